//! Link harvesting over parsed HTML snapshots.
//!
//! Matching is done with `scraper` CSS selectors for the structural part of a
//! rule and plain substring checks for the text part.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::domain::{LinkRef, TargetUrl};
use crate::error::HarvestError;
use crate::rules::{LinkRule, RuleSet, SectionRule, TextSource};

pub fn parse_selector(selector: &str) -> Result<Selector, HarvestError> {
    Selector::parse(selector).map_err(|err| HarvestError::InvalidSelector {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug)]
pub struct LinkMatcher {
    selector: Selector,
    rule: LinkRule,
}

impl LinkMatcher {
    pub fn compile(rule: &LinkRule) -> Result<Self, HarvestError> {
        Ok(Self {
            selector: parse_selector(&rule.selector)?,
            rule: rule.clone(),
        })
    }

    /// All links under `scope` satisfying the rule, in document order.
    /// An empty result is not an error.
    pub fn find_links(&self, scope: ElementRef<'_>, base: &TargetUrl) -> Vec<LinkRef> {
        let mut links = Vec::new();
        for element in scope.select(&self.selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let target = match base.join(href) {
                Ok(target) => target,
                Err(err) => {
                    debug!("ignoring link: {err}");
                    continue;
                }
            };
            if !contains_all(target.as_str(), &self.rule.href_contains) {
                continue;
            }
            let checked_text = match self.rule.text_of {
                TextSource::Link => element_text(element),
                TextSource::Parent => element
                    .parent()
                    .and_then(ElementRef::wrap)
                    .map(element_text)
                    .unwrap_or_default(),
            };
            if !contains_all(&checked_text, &self.rule.text_contains) {
                continue;
            }
            links.push(LinkRef {
                href: target,
                text: normalize_whitespace(&element_text(element)),
            });
        }
        links
    }

    pub fn first_link(&self, scope: ElementRef<'_>, base: &TargetUrl) -> Option<LinkRef> {
        self.find_links(scope, base).into_iter().next()
    }
}

fn contains_all(haystack: &str, needles: &[String]) -> bool {
    needles.iter().all(|needle| haystack.contains(needle.as_str()))
}

#[derive(Debug)]
pub struct SectionMatcher {
    container: Selector,
    heading: Selector,
    rule: SectionRule,
}

impl SectionMatcher {
    pub fn compile(rule: &SectionRule) -> Result<Self, HarvestError> {
        Ok(Self {
            container: parse_selector(&rule.container)?,
            heading: parse_selector(&rule.heading)?,
            rule: rule.clone(),
        })
    }

    /// Nearest container enclosing the first heading whose text contains the
    /// rule's phrase.
    pub fn locate<'a>(&self, document: &'a Html) -> Result<ElementRef<'a>, HarvestError> {
        for heading in document.select(&self.heading) {
            if !element_text(heading).contains(self.rule.heading_contains.as_str()) {
                continue;
            }
            let container = heading
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|element| self.container.matches(element));
            if let Some(container) = container {
                return Ok(container);
            }
        }
        Err(HarvestError::SectionNotFound(format!(
            "no `{}` holding a heading with `{}`",
            self.rule.container, self.rule.heading_contains
        )))
    }
}

/// Compiled form of a [`RuleSet`].
#[derive(Debug)]
pub struct CompiledRules {
    pub cohorts: LinkMatcher,
    pub section: SectionMatcher,
    pub data_type: LinkMatcher,
    pub file: LinkMatcher,
}

impl CompiledRules {
    pub fn compile(rules: &RuleSet) -> Result<Self, HarvestError> {
        Ok(Self {
            cohorts: LinkMatcher::compile(&rules.cohorts)?,
            section: SectionMatcher::compile(&rules.section)?,
            data_type: LinkMatcher::compile(&rules.data_type)?,
            file: LinkMatcher::compile(&rules.file)?,
        })
    }
}
