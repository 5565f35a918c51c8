//! Capability surface of one registry search tab
//!
//! The matching strategies drive the registry through this trait rather than
//! the WebDriver client directly, so strategy logic stays testable against a
//! scripted page. [`session::RegistryPage`](crate::session::RegistryPage) is
//! the live implementation.

use async_trait::async_trait;
use memrec_common::Result;

/// One result-surface hit: the matched text plus the nearest profile link,
/// raw as it appears in the markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowHit {
    pub text: String,
    pub href: Option<String>,
}

/// A single authenticated search tab.
///
/// Selector lists come from the configured selector settings; order is
/// priority and the first visible match wins. The registry markup is
/// unversioned, so a missing element is a normal outcome, not an error.
/// Errors surface only for transport or session failures.
#[async_trait]
pub trait SearchPage: Send + Sync {
    /// Navigate (back) to the member search surface and wait for it to load.
    async fn open_search(&self) -> Result<()>;

    /// Clear then type `value` into the first visible input among
    /// `selectors`. Returns false when no input was visible.
    async fn fill_first_visible(&self, selectors: &[String], value: &str) -> Result<bool>;

    /// Clear the first visible match of every selector in the list, skipping
    /// selectors with no visible match.
    async fn clear_fields(&self, selectors: &[String]) -> Result<()>;

    /// Click the first visible control among `selectors`, falling back to
    /// pressing Enter on the focused element.
    async fn trigger_search(&self, selectors: &[String]) -> Result<()>;

    /// Wait until the document is ready, then the fixed settle delay.
    async fn wait_settled(&self) -> Result<()>;

    /// First visible element whose text contains `needle`, with the nearest
    /// row link. Hrefs come back raw; callers resolve them against
    /// [`current_url`](Self::current_url).
    async fn find_text_hit(&self, needle: &str) -> Result<Option<RowHit>>;

    /// All result rows under the first selector that yields any, each with
    /// its full text and first link.
    async fn result_rows(&self, selectors: &[String]) -> Result<Vec<RowHit>>;

    /// URL of the document this tab currently shows.
    async fn current_url(&self) -> Result<String>;
}

/// Source of fresh authenticated search tabs.
///
/// Workers pull their initial tab from here and come back for a replacement
/// when theirs dies mid-run.
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn SearchPage>>;
}
