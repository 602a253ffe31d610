//! Element selectors and ordered selector sets
//!
//! A [`SelectorSet`] lists alternative strategies for finding the same
//! piece of UI (a template dropdown *or* template cards, a class-name
//! convention *or* a test id). Resolution is first-match-wins: the first
//! strategy that matches at least one element decides the result.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// A regular expression matched against visible text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPattern {
    pub source: String,

    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    true
}

impl TextPattern {
    /// Case-insensitive pattern, validated up front
    pub fn new(source: impl Into<String>) -> E2eResult<Self> {
        let pattern = Self {
            source: source.into(),
            case_insensitive: true,
        };
        pattern.regex()?;
        Ok(pattern)
    }

    /// Case-sensitive pattern
    pub fn case_sensitive(source: impl Into<String>) -> E2eResult<Self> {
        let pattern = Self {
            source: source.into(),
            case_insensitive: false,
        };
        pattern.regex()?;
        Ok(pattern)
    }

    pub fn regex(&self) -> E2eResult<Regex> {
        Ok(RegexBuilder::new(&self.source)
            .case_insensitive(self.case_insensitive)
            .build()?)
    }

    pub fn is_match(&self, text: &str) -> E2eResult<bool> {
        Ok(self.regex()?.is_match(text))
    }
}

impl fmt::Display for TextPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)?;
        if self.case_insensitive {
            write!(f, "i")?;
        }
        Ok(())
    }
}

/// One element-matching strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector, including Playwright extensions such as `:has-text()`
    Css { css: String },

    /// `data-testid` attribute
    TestId { id: String },

    /// Any element whose text matches the pattern
    Text(TextPattern),

    /// ARIA role with an optional accessible name
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl Selector {
    pub fn css(css: impl Into<String>) -> Self {
        Selector::Css { css: css.into() }
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Selector::TestId { id: id.into() }
    }

    pub fn text(pattern: TextPattern) -> Self {
        Selector::Text(pattern)
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Selector::Role {
            role: role.into(),
            name: name.map(String::from),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css { css } => write!(f, "css={}", css),
            Selector::TestId { id } => write!(f, "testid={}", id),
            Selector::Text(pattern) => write!(f, "text={}", pattern),
            Selector::Role { role, name: Some(name) } => write!(f, "role={}[name={}]", role, name),
            Selector::Role { role, name: None } => write!(f, "role={}", role),
        }
    }
}

/// Ordered alternatives resolved first-match-wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorSet(Vec<Selector>);

impl SelectorSet {
    pub fn new(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self(selectors.into_iter().collect())
    }

    /// Convenience for a set made only of CSS strategies
    pub fn css<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(selectors.into_iter().map(Selector::css))
    }

    pub fn strategies(&self) -> &[Selector] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Selector> {
        self.0.get(index)
    }
}

impl fmt::Display for SelectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, selector) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", selector)?;
        }
        Ok(())
    }
}

impl From<Selector> for SelectorSet {
    fn from(selector: Selector) -> Self {
        Self(vec![selector])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Generate", true ; "capitalised verb")]
    #[test_case("USE TEMPLATE", true ; "upper case phrase")]
    #[test_case("create new post", true ; "lower case prefix")]
    #[test_case("Templates", false ; "unrelated word")]
    fn test_action_pattern_is_case_insensitive(text: &str, expected: bool) {
        let pattern = TextPattern::new("generate|create|use template").unwrap();
        assert_eq!(pattern.is_match(text).unwrap(), expected);
    }

    #[test]
    fn test_case_sensitive_pattern() {
        let pattern = TextPattern::case_sensitive("Social").unwrap();
        assert!(pattern.is_match("Social").unwrap());
        assert!(!pattern.is_match("social").unwrap());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(TextPattern::new("(unclosed").is_err());
    }

    #[test]
    fn test_parse_selector_set_yaml() {
        let yaml = r#"
- by: css
  css: select[name*="template"]
- by: test_id
  id: template-card
- by: text
  source: use template
- by: role
  role: button
  name: Social
"#;
        let set: SelectorSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(set.strategies().len(), 4);
        assert_eq!(set.get(1), Some(&Selector::test_id("template-card")));
        match set.get(2) {
            Some(Selector::Text(pattern)) => assert!(pattern.case_insensitive),
            other => panic!("unexpected selector: {:?}", other),
        }
    }

    #[test]
    fn test_display_joins_alternatives() {
        let set = SelectorSet::css([".template-card", "[class*=\"template\"]"]);
        assert_eq!(
            set.to_string(),
            "css=.template-card | css=[class*=\"template\"]"
        );
    }
}
