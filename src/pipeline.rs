use anyhow::{Context, Result};
use scraper::Html;
use std::fmt;
use tracing::{debug, error, info, info_span, warn};

use crate::browser::PageRenderer;
use crate::config::{PipelineConfig, SearchTarget};
use crate::contacts::extract_contacts;
use crate::db::{Database, Upsert};
use crate::extract::{self, FieldExtractor};
use crate::filter::keep_location;
use crate::models::ListingCandidate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    LocationRejected(String),
    MissingDetailLink,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LocationRejected(location) => write!(f, "location '{}' not allowed", location),
            SkipReason::MissingDetailLink => write!(f, "no detail link"),
        }
    }
}

/// What happened to one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOutcome {
    Stored(i64),
    Duplicate,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetReport {
    pub label: String,
    pub cards_found: usize,
    pub cards_processed: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when the results page itself could not be fetched.
    pub error: Option<String>,
}

impl TargetReport {
    fn record(&mut self, outcome: &CardOutcome) {
        self.cards_processed += 1;
        match outcome {
            CardOutcome::Stored(_) => self.stored += 1,
            CardOutcome::Duplicate => self.duplicates += 1,
            CardOutcome::Skipped(_) => self.skipped += 1,
            CardOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn total_found(&self) -> usize {
        self.targets.iter().map(|t| t.cards_found).sum()
    }

    pub fn total_stored(&self) -> usize {
        self.targets.iter().map(|t| t.stored).sum()
    }
}

/// Drives search targets through fetch, extraction, filtering, enrichment
/// and storage, one page at a time.
pub struct Pipeline<'a, R: PageRenderer> {
    config: PipelineConfig,
    extractor: FieldExtractor,
    renderer: R,
    store: &'a Database,
}

impl<'a, R: PageRenderer> Pipeline<'a, R> {
    pub fn new(config: PipelineConfig, renderer: R, store: &'a Database) -> Result<Self> {
        let extractor = FieldExtractor::new(&config.rules, &config.origin)
            .context("Invalid extraction rules")?;
        Ok(Self {
            config,
            extractor,
            renderer,
            store,
        })
    }

    #[cfg(test)]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Run every configured target in order. Always completes; failures show
    /// up as counts in the report.
    pub fn run(&mut self) -> RunReport {
        let targets = self.config.targets.clone();
        let mut report = RunReport::default();

        for target in &targets {
            let target_report = self.run_target(target);
            info!(
                "Completed {}: {} cards found, {} stored",
                target.label, target_report.cards_found, target_report.stored
            );
            report.targets.push(target_report);
        }

        info!(
            "Finished: {} cards found, {} stored across {} targets",
            report.total_found(),
            report.total_stored(),
            report.targets.len()
        );
        report
    }

    pub fn run_target(&mut self, target: &SearchTarget) -> TargetReport {
        let span = info_span!("target", label = %target.label, city = %target.city);
        let _enter = span.enter();

        let mut report = TargetReport {
            label: target.label.clone(),
            ..Default::default()
        };

        let cards = match self.fetch_cards(target) {
            Ok(cards) => cards,
            Err(e) => {
                error!("Search results unavailable: {:#}", e);
                report.error = Some(format!("{:#}", e));
                return report;
            }
        };
        report.cards_found = cards.len();

        for (index, card) in cards.iter().take(self.config.max_cards_per_target).enumerate() {
            let index = index + 1;
            let outcome = self.process_card(index, card, target);
            match &outcome {
                CardOutcome::Stored(id) => info!(card = index, "Stored as #{}", id),
                CardOutcome::Duplicate => info!(card = index, "Already stored"),
                CardOutcome::Skipped(reason) => info!(card = index, "Skipped: {}", reason),
                CardOutcome::Failed(reason) => error!(card = index, "Failed: {}", reason),
            }
            report.record(&outcome);
        }

        report
    }

    fn fetch_cards(&mut self, target: &SearchTarget) -> Result<Vec<String>> {
        let url = self.config.search_url(target)?;
        info!("Opening search results: {}", url);

        let markup = self.renderer.fetch(url.as_str())?;
        self.renderer.dismiss_overlay();

        let signals = extract::detect_block(&markup);
        if signals.sign_in_wall {
            warn!("Results page mentions sign in; listings may be hidden");
        }
        if signals.bot_challenge {
            warn!("Results page looks like a bot challenge");
        }

        let page = Html::parse_document(&markup);
        info!(
            "Page title: {}",
            extract::page_title(&page).unwrap_or_else(|| "NO TITLE FOUND".to_string())
        );

        let cards = self.extractor.find_cards(&page);
        if cards.is_empty() {
            warn!(
                "No job cards found with any selector ({} job-like divs on page)",
                extract::count_job_like_divs(&page)
            );
        }
        info!("Total job cards found for {}: {}", target.city, cards.len());
        Ok(cards)
    }

    fn process_card(&mut self, index: usize, card_html: &str, target: &SearchTarget) -> CardOutcome {
        let span = info_span!("card", index);
        let _enter = span.enter();

        match self.try_process_card(card_html, target) {
            Ok(outcome) => outcome,
            Err(e) => CardOutcome::Failed(format!("{:#}", e)),
        }
    }

    fn try_process_card(&mut self, card_html: &str, target: &SearchTarget) -> Result<CardOutcome> {
        let fields = self.extractor.extract_card(card_html, &target.city);
        debug!("Extracted '{}' at '{}' in '{}'", fields.title, fields.company, fields.location);

        if !keep_location(&fields.location, &self.config.allowed_locations) {
            return Ok(CardOutcome::Skipped(SkipReason::LocationRejected(fields.location)));
        }

        let Some(link) = fields.detail_link else {
            return Ok(CardOutcome::Skipped(SkipReason::MissingDetailLink));
        };

        info!("Processing '{}' ({})", fields.title, link);
        let markup = self
            .renderer
            .fetch(&link)
            .with_context(|| format!("Detail page for '{}'", fields.title))?;
        self.renderer.dismiss_overlay();

        let detail = self.extractor.extract_detail(&Html::parse_document(&markup));
        let contacts = extract_contacts(&detail.description);
        if !contacts.is_empty() {
            debug!(
                "Found {} emails and {} phones",
                contacts.emails.len(),
                contacts.phones.len()
            );
        }

        let listing = ListingCandidate {
            title: fields.title,
            company: fields.company,
            location: fields.location,
            easy_apply_link: detail.easy_apply.then(|| link.clone()),
            detail_link: Some(link),
            description: detail.description,
            contacts,
        };

        Ok(match self.store.upsert(&listing) {
            Upsert::Inserted(id) => CardOutcome::Stored(id),
            Upsert::Duplicate => CardOutcome::Duplicate,
            Upsert::Failed(reason) => CardOutcome::Failed(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::{HashMap, HashSet};

    /// Serves canned markup instantly and remembers what was asked for.
    #[derive(Default)]
    struct FakeRenderer {
        results: Option<String>,
        pages: HashMap<String, String>,
        broken: HashSet<String>,
        fetched: Vec<String>,
        overlays: usize,
    }

    impl FakeRenderer {
        fn detail_fetches(&self) -> Vec<&String> {
            self.fetched.iter().filter(|u| !u.contains("/jobs/search?keywords=")).collect()
        }
    }

    impl PageRenderer for FakeRenderer {
        fn fetch(&mut self, url: &str) -> Result<String> {
            self.fetched.push(url.to_string());
            if url.contains("/jobs/search?keywords=") {
                return self.results.clone().ok_or_else(|| anyhow!("results page timed out"));
            }
            if self.broken.contains(url) {
                return Err(anyhow!("renderer crashed on {}", url));
            }
            self.pages.get(url).cloned().ok_or_else(|| anyhow!("no page at {}", url))
        }

        fn dismiss_overlay(&mut self) {
            self.overlays += 1;
        }
    }

    fn card(title: &str, location: &str, href: Option<&str>) -> String {
        let link = href
            .map(|h| format!(r#"<a class="base-card__full-link" href="{}"></a>"#, h))
            .unwrap_or_default();
        format!(
            r#"<div class="base-card">{}<h3 class="base-search-card__title">{}</h3>
               <h4 class="base-search-card__subtitle">Acme</h4>
               <span class="job-search-card__location">{}</span></div>"#,
            link, title, location
        )
    }

    fn results(cards: &[String]) -> String {
        format!("<html><head><title>Jobs</title></head><body>{}</body></html>", cards.join("\n"))
    }

    fn detail(description: &str) -> String {
        format!(
            r#"<html><body><div class="show-more-less-html__markup">{}</div></body></html>"#,
            description
        )
    }

    fn config(max_cards: usize) -> PipelineConfig {
        PipelineConfig {
            targets: vec![SearchTarget::new("Sandton", "Sandton", "101069300")],
            allowed_locations: vec!["Sandton".to_string(), "Gauteng".to_string()],
            max_cards_per_target: max_cards,
            ..PipelineConfig::default()
        }
    }

    fn store() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    #[test]
    fn test_end_to_end_three_cards() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        renderer.results = Some(results(&[
            card("Engineer", "Sandton", Some("/jobs/view/1")),
            card("Analyst", "Cape Town", Some("/jobs/view/2")),
            card("Designer", "Sandton", None),
        ]));
        renderer.pages.insert(
            "https://www.linkedin.com/jobs/view/1".to_string(),
            detail("Send your CV to a@b.com"),
        );

        let mut pipeline = Pipeline::new(config(20), renderer, &db).unwrap();
        let report = pipeline.run();

        assert_eq!(report.targets.len(), 1);
        let target = &report.targets[0];
        assert_eq!(target.cards_found, 3);
        assert_eq!(target.stored, 1);
        assert_eq!(target.skipped, 2);
        assert_eq!(report.total_stored(), 1);

        let rows = db.list_listings(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Engineer");
        assert_eq!(rows[0].detail_link, "https://www.linkedin.com/jobs/view/1");
        assert_eq!(rows[0].contacts.emails.len(), 1);
        assert!(rows[0].contacts.emails.contains("a@b.com"));
        assert_eq!(rows[0].easy_apply, None);

        // Only the kept card's detail page was visited.
        assert_eq!(pipeline.renderer().detail_fetches().len(), 1);
    }

    #[test]
    fn test_fan_out_is_bounded() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        let cards: Vec<String> = (0..50)
            .map(|n| card(&format!("Job {}", n), "Sandton", Some(&format!("/jobs/view/{}", n))))
            .collect();
        for n in 0..50 {
            renderer.pages.insert(
                format!("https://www.linkedin.com/jobs/view/{}", n),
                detail("Nothing to see"),
            );
        }
        renderer.results = Some(results(&cards));

        let mut pipeline = Pipeline::new(config(20), renderer, &db).unwrap();
        let report = pipeline.run();

        assert_eq!(report.targets[0].cards_found, 50);
        assert_eq!(report.targets[0].cards_processed, 20);
        assert_eq!(pipeline.renderer().detail_fetches().len(), 20);
        assert_eq!(db.count().unwrap(), 20);
    }

    #[test]
    fn test_card_failure_does_not_stop_the_loop() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        let cards: Vec<String> = (1..=5)
            .map(|n| card(&format!("Job {}", n), "Sandton", Some(&format!("/jobs/view/{}", n))))
            .collect();
        for n in 1..=5 {
            renderer.pages.insert(
                format!("https://www.linkedin.com/jobs/view/{}", n),
                detail("Details"),
            );
        }
        renderer.broken.insert("https://www.linkedin.com/jobs/view/3".to_string());
        renderer.results = Some(results(&cards));

        let mut pipeline = Pipeline::new(config(5), renderer, &db).unwrap();
        let report = pipeline.run();

        let target = &report.targets[0];
        assert_eq!(target.stored, 4);
        assert_eq!(target.failed, 1);
        assert_eq!(pipeline.renderer().detail_fetches().len(), 5);

        let links: HashSet<String> = db
            .list_listings(10)
            .unwrap()
            .into_iter()
            .map(|l| l.detail_link)
            .collect();
        assert!(!links.contains("https://www.linkedin.com/jobs/view/3"));
        assert!(links.contains("https://www.linkedin.com/jobs/view/4"));
        assert!(links.contains("https://www.linkedin.com/jobs/view/5"));
    }

    #[test]
    fn test_rerun_reports_duplicates() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        renderer.results = Some(results(&[card("Engineer", "Sandton", Some("/jobs/view/1"))]));
        renderer.pages.insert(
            "https://www.linkedin.com/jobs/view/1".to_string(),
            detail("Role"),
        );

        let mut config = config(5);
        config.targets.push(SearchTarget::new("Gauteng", "Gauteng", "101069296"));
        let mut pipeline = Pipeline::new(config, renderer, &db).unwrap();
        let report = pipeline.run();

        assert_eq!(report.targets[0].stored, 1);
        assert_eq!(report.targets[1].stored, 0);
        assert_eq!(report.targets[1].duplicates, 1);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_failed_target_does_not_block_next() {
        let db = store();
        let renderer = FakeRenderer::default();

        let mut config = config(5);
        config.targets.push(SearchTarget::new("Gauteng", "Gauteng", "101069296"));
        let mut pipeline = Pipeline::new(config, renderer, &db).unwrap();
        let report = pipeline.run();

        assert_eq!(report.targets.len(), 2);
        assert!(report.targets.iter().all(|t| t.error.is_some()));
        assert_eq!(report.total_stored(), 0);
        assert_eq!(pipeline.renderer().fetched.len(), 2);
    }

    #[test]
    fn test_no_cards_found_is_not_an_error() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        renderer.results = Some("<html><body><p>Sign in to see jobs</p></body></html>".to_string());

        let mut pipeline = Pipeline::new(config(5), renderer, &db).unwrap();
        let report = pipeline.run();

        assert_eq!(report.targets[0].cards_found, 0);
        assert_eq!(report.targets[0].error, None);
        assert_eq!(pipeline.renderer().overlays, 1);
    }

    #[test]
    fn test_easy_apply_and_location_default() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        renderer.results = Some(results(&[
            r#"<div class="base-card"><a class="base-card__full-link" href="/jobs/view/9"></a><h3>Ops Lead</h3></div>"#
                .to_string(),
        ]));
        renderer.pages.insert(
            "https://www.linkedin.com/jobs/view/9".to_string(),
            r#"<html><body><button>Easy Apply</button>
               <div class="description__text">Call +27 11 555 1234</div></body></html>"#
                .to_string(),
        );

        let mut pipeline = Pipeline::new(config(5), renderer, &db).unwrap();
        pipeline.run();

        let rows = db.list_listings(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, "Sandton");
        assert_eq!(rows[0].company, "N/A");
        assert_eq!(rows[0].easy_apply.as_deref(), Some("https://www.linkedin.com/jobs/view/9"));
        assert!(rows[0].contacts.phones.contains("+27 11 555 1234"));
    }

    #[test]
    fn test_contacts_from_marked_up_description() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        renderer.results = Some(results(&[card("Engineer", "Sandton", Some("/jobs/view/1"))]));
        renderer.pages.insert(
            "https://www.linkedin.com/jobs/view/1".to_string(),
            detail(
                "<p>Mail <b>jobs</b>@acme.com or <a href='mailto:hr@acme.com'>hr@acme.com</a></p>\
                 <p>Call 011 555 1234</p><p>12 month contract</p>\
                 <ul><li>Office: +27 21 555 0000</li><li>Again: jobs@acme.com</li></ul>",
            ),
        );

        let mut pipeline = Pipeline::new(config(5), renderer, &db).unwrap();
        pipeline.run();

        let rows = db.list_listings(10).unwrap();
        assert_eq!(rows.len(), 1);
        let emails: Vec<&str> = rows[0].contacts.emails.iter().map(String::as_str).collect();
        let phones: Vec<&str> = rows[0].contacts.phones.iter().map(String::as_str).collect();
        assert_eq!(emails, vec!["hr@acme.com", "jobs@acme.com"]);
        assert_eq!(phones, vec!["+27 21 555 0000", "011 555 1234"]);
    }

    #[test]
    fn test_query_identified_postings_are_not_merged() {
        let db = store();
        let mut renderer = FakeRenderer::default();
        renderer.results = Some(results(&[
            card("Engineer", "Sandton", Some("/jobs/search?currentJobId=111")),
            card("Analyst", "Sandton", Some("/jobs/search?currentJobId=222")),
        ]));
        for id in ["111", "222"] {
            renderer.pages.insert(
                format!("https://www.linkedin.com/jobs/search?currentJobId={}", id),
                detail("Role"),
            );
        }

        let mut pipeline = Pipeline::new(config(5), renderer, &db).unwrap();
        let report = pipeline.run();

        assert_eq!(report.targets[0].stored, 2);
        assert_eq!(report.targets[0].duplicates, 0);
        assert_eq!(db.count().unwrap(), 2);
        assert_eq!(pipeline.renderer().detail_fetches().len(), 2);
        assert!(db.list_listings(10).unwrap().iter().all(|l| l.description == "Role"));
    }

    #[test]
    fn test_invalid_rules_fail_construction() {
        let db = store();
        let mut config = config(5);
        config.rules.cards = vec!["div[".to_string()];
        assert!(Pipeline::new(config, FakeRenderer::default(), &db).is_err());
    }
}
