use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

pub const DEFAULT_ORIGIN: &str = "https://www.linkedin.com";

/// One location to search: a label for reports, the city text the site
/// expects and its geo identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub label: String,
    pub city: String,
    pub geo_id: String,
}

impl SearchTarget {
    pub fn new(label: &str, city: &str, geo_id: &str) -> Self {
        Self {
            label: label.to_string(),
            city: city.to_string(),
            geo_id: geo_id.to_string(),
        }
    }
}

/// Ordered CSS selector lists, tried front to back per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRules {
    pub cards: Vec<String>,
    pub title: Vec<String>,
    pub company: Vec<String>,
    pub location: Vec<String>,
    pub link: Vec<String>,
    pub description: Vec<String>,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            cards: strings(&[
                "div.base-card",
                "li.jobs-search-results__list-item",
                "div.job-search-card",
                "div.occludable-update",
                "[data-entity-urn*='jobPosting']",
                ".job-card-container",
                ".jobs-search-results__list-item",
            ]),
            title: strings(&[
                "h3.base-search-card__title",
                ".job-card-list__title",
                ".job-card-search__title",
                "h3",
            ]),
            company: strings(&[
                "h4.base-search-card__subtitle",
                ".job-card-container__company-name",
                ".job-card-container__primary-description",
                "h4",
            ]),
            location: strings(&[
                "span.job-search-card__location",
                ".job-card-container__metadata-item",
                ".job-search-card__location",
            ]),
            link: strings(&[
                "a.base-card__full-link",
                "a.job-card-list__title",
                "a.job-card-container__link",
                "a[href*='/jobs/view/']",
                "a[href]",
            ]),
            description: strings(&[
                ".show-more-less-html__markup",
                ".description__text",
                ".jobs-description__content",
                ".jobs-box__html-content",
                "div.jobs-description-content__text",
                "#job-details",
                "article.jobs-description",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Everything a pipeline run needs. Built once, then handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub targets: Vec<SearchTarget>,
    pub allowed_locations: Vec<String>,
    pub max_cards_per_target: usize,
    pub origin: String,
    pub keywords: String,
    /// Value of the site's "time posted" filter; `r86400` is the last 24 hours.
    pub posted_within: String,
    pub rules: ExtractionRules,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            targets: vec![SearchTarget::new("Gauteng", "City of Johannesburg", "101069296")],
            allowed_locations: strings(&[
                "Johannesburg",
                "Gauteng",
                "Sandton",
                "Midrand",
                "Randburg",
                "Remote",
            ]),
            max_cards_per_target: 5,
            origin: DEFAULT_ORIGIN.to_string(),
            keywords: String::new(),
            posted_within: "r86400".to_string(),
            rules: ExtractionRules::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn search_url(&self, target: &SearchTarget) -> Result<Url> {
        let base = Url::parse(&self.origin)
            .with_context(|| format!("Invalid origin: {}", self.origin))?;
        let mut url = base.join("/jobs/search")?;
        url.query_pairs_mut()
            .append_pair("keywords", &self.keywords)
            .append_pair("location", &target.city)
            .append_pair("geoId", &target.geo_id)
            .append_pair("f_TPR", &self.posted_within)
            .append_pair("position", "1")
            .append_pair("pageNum", "0");
        Ok(url)
    }
}
