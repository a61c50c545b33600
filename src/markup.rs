use crate::error::ResolveError;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// A parsed snapshot of a page's rendered markup.
pub struct Markup {
    document: Html,
}

/// The parts of a matched element a rule can read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
}

impl Node {
    fn from_element(element: ElementRef<'_>) -> Self {
        let value = element.value();
        Self {
            tag: value.name().to_string(),
            attributes: value
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            text: element.text().collect::<String>(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Parse a selector the way `Markup::query` will, for load-time validation.
pub fn parse_selector(selector: &str) -> Result<Selector, ResolveError> {
    Selector::parse(selector).map_err(|e| ResolveError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

impl Markup {
    pub fn parse(markup: &str) -> Self {
        Self {
            document: Html::parse_document(markup),
        }
    }

    pub fn from_bytes(markup: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(markup))
    }

    /// The first element matching `selector`, if any.
    pub fn query(&self, selector: &str) -> Result<Option<Node>, ResolveError> {
        let selector = parse_selector(selector)?;
        Ok(self.document.select(&selector).next().map(Node::from_element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>t</title></head><body>
        <div id="watch7-content" class="watch-main-col">
          <meta itemprop="channelId" content="UCabc123">
          <span class="name">Some <b>Channel</b></span>
        </div>
        <meta itemprop="channelId" content="UCsecond">
    </body></html>"#;

    #[test]
    fn test_query_first_match() {
        let markup = Markup::parse(PAGE);
        let node = markup
            .query("meta[itemprop='channelId']")
            .unwrap()
            .unwrap();
        assert_eq!(node.tag, "meta");
        assert_eq!(node.attribute("content"), Some("UCabc123"));
        assert_eq!(node.attribute("missing"), None);
    }

    #[test]
    fn test_query_scoped_selector_and_text() {
        let markup = Markup::from_bytes(PAGE.as_bytes());
        let node = markup
            .query("#watch7-content.watch-main-col span.name")
            .unwrap()
            .unwrap();
        assert_eq!(node.text(), "Some Channel");
    }

    #[test]
    fn test_query_no_match() {
        let markup = Markup::parse(PAGE);
        assert_eq!(markup.query("img.avatar").unwrap(), None);
    }

    #[test]
    fn test_invalid_selector() {
        let markup = Markup::parse(PAGE);
        assert!(matches!(
            markup.query("div[[["),
            Err(ResolveError::InvalidSelector { .. })
        ));
    }
}
