mod helpers;
mod subscribers_bulk;
mod subscribers_create;
mod subscribers_search;
