//! Autocapture element matching
//!
//! Decides whether the DOM element chain captured with an event satisfies
//! the tag/text/href/selector criteria of a definition.

use crate::posthog::message::Element;
use tracing::warn;

/// Attribute-bag key an `href` may be carried under.
pub const HREF_ATTRIBUTE: &str = "attr__href";

/// Autocapture criteria of a single definition step.
///
/// Every field is optional; a `None` field is not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementCriteria {
    /// Exact tag name
    pub tag_name: Option<String>,
    /// Exact element text
    pub text: Option<String>,
    /// Exact link target
    pub href: Option<String>,
    /// CSS selector (not supported, always fails)
    pub selector: Option<String>,
}

impl ElementCriteria {
    /// True iff at least one criterion is set.
    ///
    /// Callers gate [`ElementCriteria::matches`] on this.
    pub fn should_check(&self) -> bool {
        self.tag_name.is_some() || self.text.is_some() || self.href.is_some() || self.selector.is_some()
    }

    /// Checks the element chain against these criteria.
    ///
    /// Narrowing is conjunctive: tag name, then text, then href. Any element
    /// surviving all set criteria is a match. A selector fails the match
    /// unconditionally.
    ///
    /// # Examples
    ///
    /// ```
    /// use gclid_export::matching::ElementCriteria;
    /// use gclid_export::posthog::Element;
    ///
    /// let criteria = ElementCriteria {
    ///     tag_name: Some("a".to_string()),
    ///     href: Some("/docs".to_string()),
    ///     ..Default::default()
    /// };
    /// let link = Element {
    ///     tag_name: "a".to_string(),
    ///     href: Some("/docs".to_string()),
    ///     text: Some("Heatmaps".to_string()),
    ///     ..Default::default()
    /// };
    ///
    /// assert!(criteria.matches(&[link]));
    /// ```
    pub fn matches(&self, elements: &[Element]) -> bool {
        if let Some(selector) = &self.selector {
            warn!(
                selector = %selector,
                "Selector criteria are not supported (partial and compound selectors cannot be matched); definition will not match"
            );
            return false;
        }

        let mut candidates: Vec<&Element> = elements.iter().collect();

        if let Some(tag_name) = &self.tag_name {
            candidates.retain(|el| &el.tag_name == tag_name);
        }

        if let Some(text) = &self.text {
            candidates.retain(|el| el.text.as_ref() == Some(text));
        }

        if let Some(href) = &self.href {
            candidates.retain(|el| element_href_is(el, href));
        }

        !candidates.is_empty()
    }
}

/// Matches the direct `href` field or the `attr__href` attribute.
fn element_href_is(element: &Element, href: &str) -> bool {
    element.href.as_deref() == Some(href)
        || element.attributes.get(HREF_ATTRIBUTE).map(String::as_str) == Some(href)
}
