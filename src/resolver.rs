//! Maps a visited URL (and, when a rule needs it, the page markup) to the
//! publisher that gets credit for the visit.

use crate::error::{ResolveError, Result};
use crate::expression::{EvalContext, Value};
use crate::markup::Markup;
use crate::properties::{DomainParts, PropertySet};
use crate::rules::{default_rules, Rule, RuleSet};
use std::borrow::Cow;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherMatch {
    pub publisher: String,
    /// Position of the deciding rule in the table.
    pub rule_index: usize,
    pub description: Option<String>,
    /// Extracted from the markup when the deciding rule knows how.
    pub favicon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Publisher(PublisherMatch),
    /// A rule explicitly marked the page as belonging to no publisher.
    Excluded { rule_index: usize },
    /// The URL is not attributable, or no rule decided.
    NotApplicable,
}

impl Resolution {
    pub fn publisher(&self) -> Option<&str> {
        match self {
            Resolution::Publisher(m) => Some(&m.publisher),
            _ => None,
        }
    }

    pub fn into_publisher(self) -> Option<String> {
        match self {
            Resolution::Publisher(m) => Some(m.publisher),
            _ => None,
        }
    }
}

/// Resolve with the shipped rule table.
pub fn resolve_publisher(location: &str, markup: Option<&str>) -> Result<Option<String>> {
    Resolver::default()
        .resolve(location, markup)
        .map(Resolution::into_publisher)
}

/// A publisher id is a bare domain or `domain/path` without query or fragment.
pub fn is_publisher_id(id: &str) -> bool {
    let domain = id.split('/').next().unwrap_or_default();
    let is_domain = matches!(Host::parse(domain), Ok(Host::Domain(_)));
    if !is_domain || DomainParts::from_host(domain).is_none() {
        return false;
    }
    if !id.contains('/') {
        return true;
    }

    match Url::parse(&format!("https://{id}")) {
        Ok(parsed) => parsed.query().is_none() && parsed.fragment().is_none(),
        Err(_) => false,
    }
}

fn normalize(publisher: &str) -> &str {
    publisher.trim_matches(|c| c == '.' || c == '/')
}

#[derive(Debug, Clone)]
pub struct Resolver {
    rules: Cow<'static, RuleSet>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            rules: Cow::Borrowed(default_rules()),
        }
    }
}

impl Resolver {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Cow::Owned(rules),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn resolve(&self, location: &str, markup: Option<&str>) -> Result<Resolution> {
        let props = match PropertySet::from_url(location) {
            Ok(props) => props,
            Err(ResolveError::InvalidUrl(reason)) => {
                log::debug!("Not attributable: {reason}");
                return Ok(Resolution::NotApplicable);
            }
            Err(e) => return Err(e),
        };

        let mut document: Option<Markup> = None;

        for (rule_index, rule) in self.rules.rules().iter().enumerate() {
            let ctx = EvalContext::new(&props);
            let evaluation = |source| ResolveError::Evaluation { rule_index, source };

            if !rule.condition.matches(&ctx).map_err(evaluation)? {
                continue;
            }

            let result = match rule.dom.as_ref().and_then(|dom| dom.publisher.as_ref()) {
                Some(sub) => {
                    let markup = markup.ok_or(ResolveError::MissingMarkup { rule_index })?;
                    let document = document.get_or_insert_with(|| Markup::parse(markup));
                    let node = document.query(&sub.node_selector)?;
                    sub.consequent
                        .evaluate(&ctx.with_node(node.as_ref()))
                        .map_err(evaluation)?
                }
                None => rule.consequent.evaluate(&ctx).map_err(evaluation)?,
            };

            match result {
                Value::Str(s) if s.is_empty() => continue,
                Value::Str(s) if !normalize(&s).is_empty() => {
                    let publisher = normalize(&s).to_string();
                    log::debug!("{location} -> {publisher} (rule {rule_index})");
                    let favicon_url = markup.and_then(|markup| {
                        let document = document.get_or_insert_with(|| Markup::parse(markup));
                        favicon_url(rule, &ctx, document)
                    });
                    return Ok(Resolution::Publisher(PublisherMatch {
                        publisher,
                        rule_index,
                        description: rule.description.clone(),
                        favicon_url,
                    }));
                }
                _ => {
                    log::debug!("{location} excluded by rule {rule_index}");
                    return Ok(Resolution::Excluded { rule_index });
                }
            }
        }

        Ok(Resolution::NotApplicable)
    }
}

fn favicon_url(rule: &Rule, ctx: &EvalContext<'_>, document: &Markup) -> Option<String> {
    let sub = rule.dom.as_ref()?.favicon_url.as_ref()?;
    let node = document.query(&sub.node_selector).ok()??;
    match sub.consequent.evaluate(&ctx.with_node(Some(&node))) {
        Ok(Value::Str(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}
