use serde::{Deserialize, Serialize};

/// Which text a link rule's `text_contains` predicate is checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    #[default]
    Link,
    Parent,
}

/// Structural selector plus literal, case-sensitive substring predicates.
/// Every listed substring must be present for a link to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRule {
    pub selector: String,
    #[serde(default)]
    pub href_contains: Vec<String>,
    #[serde(default)]
    pub text_contains: Vec<String>,
    #[serde(default)]
    pub text_of: TextSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRule {
    pub container: String,
    pub heading: String,
    pub heading_contains: String,
}

/// The four resolution rules, one per navigation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_cohort_rule")]
    pub cohorts: LinkRule,
    #[serde(default = "default_section_rule")]
    pub section: SectionRule,
    #[serde(default = "default_data_type_rule")]
    pub data_type: LinkRule,
    #[serde(default = "default_file_rule")]
    pub file: LinkRule,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            cohorts: default_cohort_rule(),
            section: default_section_rule(),
            data_type: default_data_type_rule(),
            file: default_file_rule(),
        }
    }
}

pub fn default_cohort_rule() -> LinkRule {
    LinkRule {
        selector: "ul > li > a".to_string(),
        href_contains: vec!["TCGA".to_string()],
        text_contains: Vec::new(),
        text_of: TextSource::Link,
    }
}

pub fn default_section_rule() -> SectionRule {
    SectionRule {
        container: "div".to_string(),
        heading: "h1, h2, h3, h4, h5, h6".to_string(),
        heading_contains: "gene expression RNAseq".to_string(),
    }
}

pub fn default_data_type_rule() -> LinkRule {
    LinkRule {
        selector: "li > a".to_string(),
        href_contains: Vec::new(),
        text_contains: vec!["IlluminaHiSeq".to_string(), "pancan".to_string()],
        text_of: TextSource::Link,
    }
}

pub fn default_file_rule() -> LinkRule {
    LinkRule {
        selector: "span > a".to_string(),
        href_contains: Vec::new(),
        text_contains: vec!["download".to_string()],
        text_of: TextSource::Link,
    }
}
