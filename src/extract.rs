use anyhow::{anyhow, Context, Result};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::config::ExtractionRules;
use crate::models::NOT_AVAILABLE;

const EASY_APPLY: &str = "Easy Apply";

// Elements whose boundaries start a new line in block text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hr", "li", "ol", "p", "pre", "section", "table", "td", "th", "tr",
    "ul",
];

// Query parameters that vary per session without changing the posting.
const TRACKING_PARAMS: &[&str] = &[
    "trk", "trkInfo", "refId", "trackingId", "eBP", "lipi", "lici", "midToken", "midSig",
    "originalSubdomain",
];

/// An ordered list of selectors. The first one that yields non-empty text
/// (or attribute) wins; later entries are looser fallbacks.
pub struct Cascade {
    selectors: Vec<(String, Selector)>,
}

impl Cascade {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let selectors = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Selector::parse(pattern)
                    .map(|selector| (pattern.to_string(), selector))
                    .map_err(|e| anyhow!("Invalid selector '{}': {}", pattern, e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { selectors })
    }

    /// Generic "first non-empty match wins" over the selectors, in order.
    fn first<T>(&self, root: ElementRef, pick: impl Fn(ElementRef) -> Option<T>) -> Option<T> {
        self.selectors
            .iter()
            .find_map(|(_, selector)| root.select(selector).find_map(&pick))
    }

    pub fn first_text(&self, root: ElementRef) -> Option<String> {
        self.first(root, |el| Some(element_text(el)).filter(|t| !t.is_empty()))
    }

    pub fn first_block_text(&self, root: ElementRef) -> Option<String> {
        self.first(root, |el| Some(block_text(el)).filter(|t| !t.is_empty()))
    }

    pub fn first_attr(&self, root: ElementRef, attr: &str) -> Option<String> {
        self.first(root, |el| {
            el.value()
                .attr(attr)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    }

    /// All elements matched by the first selector that matches anything,
    /// along with that selector's text.
    pub fn first_non_empty<'a>(&'a self, document: &'a Html) -> Option<(&'a str, Vec<ElementRef<'a>>)> {
        self.selectors.iter().find_map(|(pattern, selector)| {
            let found: Vec<_> = document.select(selector).collect();
            (!found.is_empty()).then_some((pattern.as_str(), found))
        })
    }
}

/// Visible text with whitespace runs collapsed to single spaces.
pub fn element_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of a multi-paragraph element. Inline nodes join without separators,
/// block elements break lines, and whitespace collapses within each line.
pub fn block_text(el: ElementRef) -> String {
    let mut raw = String::new();
    push_block_text(el, &mut raw);
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_block_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if matches!(name, "script" | "style" | "template") {
                    continue;
                }
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_ELEMENTS.iter().any(|tag| *tag == name);
                if block {
                    out.push('\n');
                }
                push_block_text(child_el, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Fields read off one search-results card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFields {
    pub title: String,
    pub company: String,
    pub location: String,
    pub detail_link: Option<String>,
}

/// What the detail page contributes to a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailFields {
    pub description: String,
    pub easy_apply: bool,
}

pub struct FieldExtractor {
    origin: Url,
    cards: Cascade,
    title: Cascade,
    company: Cascade,
    location: Cascade,
    link: Cascade,
    description: Cascade,
    controls: Selector,
}

impl FieldExtractor {
    pub fn new(rules: &ExtractionRules, origin: &str) -> Result<Self> {
        let origin = Url::parse(origin).with_context(|| format!("Invalid origin: {}", origin))?;
        Ok(Self {
            origin,
            cards: Cascade::new(&rules.cards).context("cards")?,
            title: Cascade::new(&rules.title).context("title")?,
            company: Cascade::new(&rules.company).context("company")?,
            location: Cascade::new(&rules.location).context("location")?,
            link: Cascade::new(&rules.link).context("link")?,
            description: Cascade::new(&rules.description).context("description")?,
            controls: Selector::parse("button, [role='button']")
                .map_err(|e| anyhow!("Invalid control selector: {}", e))?,
        })
    }

    /// Outer markup of every card on a results page, using the first card
    /// selector that finds anything. Empty when none match.
    pub fn find_cards(&self, page: &Html) -> Vec<String> {
        match self.cards.first_non_empty(page) {
            Some((pattern, found)) => {
                tracing::info!("Found {} cards with selector: {}", found.len(), pattern);
                found.iter().map(|el| el.html()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Read title, company, location and detail link from one card's markup.
    /// `search_location` stands in when no location is found.
    pub fn extract_card(&self, card_html: &str, search_location: &str) -> CardFields {
        let fragment = Html::parse_fragment(card_html);
        let root = fragment.root_element();

        CardFields {
            title: self.title.first_text(root).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            company: self.company.first_text(root).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            location: self
                .location
                .first_text(root)
                .unwrap_or_else(|| search_location.to_string()),
            detail_link: self
                .link
                .first_attr(root, "href")
                .and_then(|href| normalize_link(&self.origin, &href)),
        }
    }

    pub fn extract_detail(&self, page: &Html) -> DetailFields {
        let root = page.root_element();
        DetailFields {
            description: self
                .description
                .first_block_text(root)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            easy_apply: page
                .select(&self.controls)
                .any(|el| element_text(el).contains(EASY_APPLY)),
        }
    }
}

/// Resolve a card href against the site origin. Root-relative links become
/// absolute; tracking parameters and the fragment are dropped, every other
/// query parameter is kept.
pub fn normalize_link(origin: &Url, href: &str) -> Option<String> {
    let mut url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => origin.join(href).ok()?,
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.iter().any(|param| *param == &**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.set_query(None);
    if !kept.is_empty() {
        url.query_pairs_mut().extend_pairs(kept.iter());
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Hints that a results page may not contain real listings. Both can be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSignals {
    pub sign_in_wall: bool,
    pub bot_challenge: bool,
}

pub fn detect_block(markup: &str) -> BlockSignals {
    let lower = markup.to_lowercase();
    BlockSignals {
        sign_in_wall: lower.contains("sign in"),
        bot_challenge: lower.contains("captcha") || lower.contains("robot"),
    }
}

pub fn page_title(page: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    page.select(&selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Count of `div`s whose class names mention job, card, list or result.
/// Used as a hint when no card selector matched.
pub fn count_job_like_divs(page: &Html) -> usize {
    let Ok(selector) = Selector::parse("div[class]") else {
        return 0;
    };
    page.select(&selector)
        .filter(|el| {
            el.value().classes().any(|class| {
                ["job", "card", "list", "result"]
                    .iter()
                    .any(|word| class.contains(word))
            })
        })
        .count()
}
