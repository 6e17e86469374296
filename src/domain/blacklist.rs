use std::fmt::Display;
use std::str::FromStr;

use regex::Regex;
use regex::RegexBuilder;

/// Flow a blacklist entry is enforced in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlacklistZone {
    ListSubscribe,
    General,
}

impl BlacklistZone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListSubscribe => "list-subscribe",
            Self::General => "general",
        }
    }
}

impl Display for BlacklistZone {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistZone {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list-subscribe" => Ok(Self::ListSubscribe),
            "general" => Ok(Self::General),
            other => Err(format!("{other:?} is not a valid blacklist zone")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistScope {
    Global,
    Customer(i64),
}

/// `pattern` is a literal address, or a regular expression between slashes
/// (`/@spam\.example$/`). Both match regardless of case.
#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistEntry {
    pub pattern: String,
    pub scope: BlacklistScope,
    pub zones: Vec<BlacklistZone>,
}

impl BlacklistEntry {
    pub fn literal(
        email: &str,
        scope: BlacklistScope,
    ) -> Self {
        Self {
            pattern: email.to_string(),
            scope,
            zones: vec![BlacklistZone::ListSubscribe],
        }
    }
}

enum Matcher {
    Literal(String),
    Pattern(Regex),
}

struct Rule {
    matcher: Matcher,
    zones: Vec<BlacklistZone>,
}

/// Compiled view over the entries applicable to one customer (its own plus
/// the global ones). Build one per admission; entries are not cached.
pub struct BlacklistFilter {
    rules: Vec<Rule>,
}

impl BlacklistFilter {
    pub fn new(entries: impl IntoIterator<Item = BlacklistEntry>) -> Self {
        let rules = entries
            .into_iter()
            .filter_map(|entry| {
                let matcher = match entry
                    .pattern
                    .strip_prefix('/')
                    .and_then(|p| p.strip_suffix('/'))
                {
                    Some(pattern) => match RegexBuilder::new(pattern).case_insensitive(true).build() {
                        Ok(re) => Matcher::Pattern(re),
                        Err(e) => {
                            tracing::warn!(
                                error.cause_chain=?e,
                                pattern=%entry.pattern,
                                "skipping invalid blacklist pattern"
                            );
                            return None;
                        }
                    },
                    None => Matcher::Literal(entry.pattern.trim().to_lowercase()),
                };
                Some(Rule {
                    matcher,
                    zones: entry.zones,
                })
            })
            .collect();
        Self { rules }
    }

    pub fn is_blacklisted(
        &self,
        email: &str,
        zone: BlacklistZone,
    ) -> bool {
        let lowered = email.trim().to_lowercase();
        self.rules
            .iter()
            .filter(|r| r.zones.contains(&zone))
            .any(|r| match &r.matcher {
                Matcher::Literal(literal) => *literal == lowered,
                Matcher::Pattern(re) => re.is_match(email.trim()),
            })
    }
}
