//! Authenticated registry session shared by every worker
//!
//! One WebDriver session holds the signed-in cookies; each worker drives its
//! own browser tab ([`RegistryPage`]) under that session. The driver targets
//! one window at a time, so every command batch runs under a context-wide
//! lock that switches to the right tab first.

use crate::search_page::{PageFactory, RowHit, SearchPage};
use crate::webdriver::{xpath_literal, DriverError, ElementRef, WebDriver, ENTER_KEY};
use async_trait::async_trait;
use memrec_common::config::{Credentials, Settings, TimingSettings};
use memrec_common::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::sleep;

/// Lifecycle of the shared registry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    LoggingIn,
    Authenticated,
    SearchReady,
    Searching,
    Closed,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::LoggingIn => "logging-in",
            SessionState::Authenticated => "authenticated",
            SessionState::SearchReady => "search-ready",
            SessionState::Searching => "searching",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        })
    }
}

/// The shared authenticated context: one WebDriver session, many tabs.
///
/// Login happens exactly once. Workers that lose their tab come back through
/// [`SessionPages`] for a fresh one; the session cookies survive, so no
/// re-authentication is ever needed.
pub struct RegistryContext {
    driver: WebDriver,
    settings: Arc<Settings>,
    /// Serializes switch-then-command batches across tabs.
    cmd_lock: Mutex<()>,
    state: Mutex<SessionState>,
    /// The window the session opened with; the first tab request reuses it.
    initial_window: Mutex<Option<String>>,
}

impl RegistryContext {
    /// Open a WebDriver session against a running chromedriver.
    pub async fn connect(
        webdriver_url: &str,
        headless: bool,
        settings: Arc<Settings>,
    ) -> Result<Arc<Self>> {
        let driver = WebDriver::new_session(webdriver_url, headless).await?;
        let initial = driver.window_handle().await?;
        Ok(Arc::new(Self {
            driver,
            settings,
            cmd_lock: Mutex::new(()),
            state: Mutex::new(SessionState::Unauthenticated),
            initial_window: Mutex::new(Some(initial)),
        }))
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().await;
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "Session state");
            *state = next;
        }
    }

    /// Sign into the registry.
    ///
    /// Fails with [`Error::LoginFormNotFound`] when no credential fields
    /// appear within the field timeout, and with [`Error::InvalidCredentials`]
    /// when the registry shows an error banner after submit. When neither a
    /// success nor an error marker can be found the session proceeds with a
    /// warning; the registry markup is not stable enough to treat that as
    /// fatal.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.set_state(SessionState::LoggingIn).await;
        match self.login_inner(credentials).await {
            Ok(()) => {
                self.set_state(SessionState::Authenticated).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Error).await;
                Err(e)
            }
        }
    }

    async fn login_inner(&self, credentials: &Credentials) -> Result<()> {
        let sel = &self.settings.selectors;
        let timing = &self.settings.timing;

        tracing::info!("Navigating to login page");
        self.driver.goto(&self.settings.registry.login_url).await?;
        wait_ready_on(&self.driver, timing).await?;
        self.dismiss_cookie_banner().await;

        tracing::info!("Waiting for login form fields");
        let (email_input, _) = self
            .wait_for_any_visible(&sel.email, timing.field_timeout())
            .await?
            .ok_or(Error::LoginFormNotFound)?;
        let (password_input, _) = self
            .wait_for_any_visible(&sel.password, timing.field_timeout())
            .await?
            .ok_or(Error::LoginFormNotFound)?;

        tracing::info!("Filling credentials");
        self.driver.clear(&email_input).await?;
        self.driver
            .send_keys(&email_input, &credentials.email)
            .await?;
        self.driver.clear(&password_input).await?;
        self.driver
            .send_keys(&password_input, &credentials.password)
            .await?;

        let clicked = match self.first_visible(&sel.submit).await? {
            Some((button, _)) => benign(self.driver.click(&button).await)?.is_some(),
            None => false,
        };
        if !clicked {
            // Enter in the password field submits most login forms
            benign(self.driver.send_keys(&password_input, ENTER_KEY).await)?;
        }

        // Give the submit navigation time to start before probing markers
        sleep(timing.settle_delay()).await;
        wait_ready_on(&self.driver, timing).await?;

        if self.first_visible(&sel.post_login).await?.is_some() {
            tracing::info!("Login successful");
            return Ok(());
        }
        if self.first_visible(&sel.error_banner).await?.is_some() {
            return Err(Error::InvalidCredentials);
        }
        tracing::warn!("Could not verify sign-in; continuing");
        Ok(())
    }

    /// The consent banner only sometimes appears; bounded, best-effort.
    async fn dismiss_cookie_banner(&self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match self.first_visible(&self.settings.selectors.cookie_accept).await {
                Ok(Some((button, _))) => {
                    tracing::debug!("Cookie banner detected, accepting");
                    let _ = self.driver.click(&button).await;
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    sleep(self.settings.timing.poll_interval()).await;
                }
                _ => return,
            }
        }
    }

    async fn first_visible<'a>(
        &self,
        selectors: &'a [String],
    ) -> Result<Option<(ElementRef, &'a str)>> {
        first_visible_on(&self.driver, selectors).await
    }

    /// Poll the selector list until one is visible or `timeout` elapses.
    async fn wait_for_any_visible<'a>(
        &self,
        selectors: &'a [String],
        timeout: Duration,
    ) -> Result<Option<(ElementRef, &'a str)>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.first_visible(selectors).await? {
                return Ok(Some(found));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.settings.timing.poll_interval()).await;
        }
    }

    /// Open a search tab under this session. The first call reuses the window
    /// login ran in; later calls open fresh tabs.
    pub async fn open_page(self: &Arc<Self>) -> Result<RegistryPage> {
        let _guard = self.cmd_lock.lock().await;
        let window = match self.initial_window.lock().await.take() {
            Some(handle) => handle,
            None => self.driver.new_window().await?,
        };
        self.driver.switch_window(&window).await?;
        tracing::info!("Opening member search page");
        self.driver.goto(&self.settings.registry.search_url).await?;
        wait_ready_on(&self.driver, &self.settings.timing).await?;
        self.set_state(SessionState::SearchReady).await;
        Ok(RegistryPage {
            ctx: Arc::clone(self),
            window,
        })
    }

    /// Factory view of this context for the scheduler.
    pub fn pages(self: &Arc<Self>) -> SessionPages {
        SessionPages {
            ctx: Arc::clone(self),
        }
    }

    /// Tear down the browser session.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.cmd_lock.lock().await;
        self.driver.delete_session().await?;
        self.set_state(SessionState::Closed).await;
        Ok(())
    }
}

/// Hands out tabs of one authenticated context.
#[derive(Clone)]
pub struct SessionPages {
    ctx: Arc<RegistryContext>,
}

#[async_trait]
impl PageFactory for SessionPages {
    async fn open_page(&self) -> Result<Box<dyn SearchPage>> {
        Ok(Box::new(self.ctx.open_page().await?))
    }
}

/// One tab of the shared session.
///
/// Every operation locks the context, switches the driver to this tab, then
/// runs its commands, so tabs can be driven from independent tasks.
pub struct RegistryPage {
    ctx: Arc<RegistryContext>,
    window: String,
}

impl RegistryPage {
    async fn lock_tab(&self) -> Result<MutexGuard<'_, ()>> {
        let guard = self.ctx.cmd_lock.lock().await;
        self.ctx.driver.switch_window(&self.window).await?;
        Ok(guard)
    }
}

/// Text and nearest row link for the element a text probe matched.
const HIT_SCRIPT: &str = "\
var el = arguments[0];\n\
var text = el.innerText || el.textContent || '';\n\
var row = el.closest('tr, li, .result, [role=\"row\"]');\n\
var link = (row && row.querySelector('a[href]')) || el.closest('a[href]');\n\
return [text, link ? link.getAttribute('href') : null];";

/// Full text and first link of one result row.
const ROW_SCRIPT: &str = "\
var row = arguments[0];\n\
var link = row.querySelector('a[href]');\n\
return [row.innerText || row.textContent || '', link ? link.getAttribute('href') : null];";

#[async_trait]
impl SearchPage for RegistryPage {
    async fn open_search(&self) -> Result<()> {
        let _tab = self.lock_tab().await?;
        tracing::info!("Opening member search page");
        self.ctx
            .driver
            .goto(&self.ctx.settings.registry.search_url)
            .await?;
        wait_ready_on(&self.ctx.driver, &self.ctx.settings.timing).await?;
        self.ctx.set_state(SessionState::SearchReady).await;
        Ok(())
    }

    async fn fill_first_visible(&self, selectors: &[String], value: &str) -> Result<bool> {
        let _tab = self.lock_tab().await?;
        let Some((input, selector)) = first_visible_on(&self.ctx.driver, selectors).await? else {
            return Ok(false);
        };
        tracing::debug!(selector, "Typing into selector");
        self.ctx.driver.clear(&input).await?;
        self.ctx.driver.send_keys(&input, value).await?;
        Ok(true)
    }

    async fn clear_fields(&self, selectors: &[String]) -> Result<()> {
        let _tab = self.lock_tab().await?;
        for selector in selectors {
            let Some(el) = benign(self.ctx.driver.find(selector).await)?.flatten() else {
                continue;
            };
            if benign(self.ctx.driver.is_displayed(&el).await)?.unwrap_or(false) {
                benign(self.ctx.driver.clear(&el).await)?;
            }
        }
        Ok(())
    }

    async fn trigger_search(&self, selectors: &[String]) -> Result<()> {
        let _tab = self.lock_tab().await?;
        self.ctx.set_state(SessionState::Searching).await;
        if let Some((button, _)) = first_visible_on(&self.ctx.driver, selectors).await? {
            tracing::debug!("Clicking Search button");
            if benign(self.ctx.driver.click(&button).await)?.is_some() {
                return Ok(());
            }
        }
        // Enter lands on the input the caller just typed into
        tracing::debug!("Pressing Enter to trigger search");
        if let Some(el) = benign(self.ctx.driver.active_element().await)?.flatten() {
            benign(self.ctx.driver.send_keys(&el, ENTER_KEY).await)?;
        }
        Ok(())
    }

    async fn wait_settled(&self) -> Result<()> {
        {
            let _tab = self.lock_tab().await?;
            wait_ready_on(&self.ctx.driver, &self.ctx.settings.timing).await?;
        }
        sleep(self.ctx.settings.timing.settle_delay()).await;
        self.ctx.set_state(SessionState::SearchReady).await;
        Ok(())
    }

    async fn find_text_hit(&self, needle: &str) -> Result<Option<RowHit>> {
        let _tab = self.lock_tab().await?;
        let probe = format!("//*[contains(text(), {})]", xpath_literal(needle));
        let Some(el) = benign(self.ctx.driver.find(&probe).await)?.flatten() else {
            return Ok(None);
        };
        if !benign(self.ctx.driver.is_displayed(&el).await)?.unwrap_or(false) {
            return Ok(None);
        }
        // A hit whose text extraction fails is still a hit
        let value = benign(self.ctx.driver.execute(HIT_SCRIPT, vec![el.to_arg()]).await)?;
        Ok(Some(
            value
                .as_ref()
                .and_then(row_hit_from)
                .unwrap_or(RowHit {
                    text: String::new(),
                    href: None,
                }),
        ))
    }

    async fn result_rows(&self, selectors: &[String]) -> Result<Vec<RowHit>> {
        let _tab = self.lock_tab().await?;
        for selector in selectors {
            let elements = match self.ctx.driver.find_all(selector).await {
                Ok(els) => els,
                Err(DriverError::Protocol { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if elements.is_empty() {
                continue;
            }
            let mut rows = Vec::with_capacity(elements.len());
            for el in &elements {
                let value = benign(self.ctx.driver.execute(ROW_SCRIPT, vec![el.to_arg()]).await)?;
                if let Some(hit) = value.as_ref().and_then(row_hit_from) {
                    rows.push(hit);
                }
            }
            return Ok(rows);
        }
        Ok(Vec::new())
    }

    async fn current_url(&self) -> Result<String> {
        let _tab = self.lock_tab().await?;
        Ok(self.ctx.driver.current_url().await?)
    }
}

/// First visible element across a prioritized selector list.
async fn first_visible_on<'a>(
    driver: &WebDriver,
    selectors: &'a [String],
) -> Result<Option<(ElementRef, &'a str)>> {
    for selector in selectors {
        let Some(el) = benign(driver.find(selector).await)?.flatten() else {
            continue;
        };
        if benign(driver.is_displayed(&el).await)?.unwrap_or(false) {
            return Ok(Some((el, selector)));
        }
    }
    Ok(None)
}

/// Wait for the document to finish loading. The registry occasionally keeps
/// a request pending forever, so a timeout here is logged and tolerated.
async fn wait_ready_on(driver: &WebDriver, timing: &TimingSettings) -> Result<()> {
    let deadline = Instant::now() + timing.field_timeout();
    loop {
        match driver.execute("return document.readyState", Vec::new()).await {
            Ok(v) if v.as_str() == Some("complete") => return Ok(()),
            Ok(_) | Err(DriverError::Protocol { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            tracing::warn!("Page did not reach readyState=complete in time; continuing");
            return Ok(());
        }
        sleep(timing.poll_interval()).await;
    }
}

/// Collapse protocol-level failures (stale element, not interactable) into
/// `None`; transport and session failures stay fatal.
fn benign<T>(result: std::result::Result<T, DriverError>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(DriverError::Protocol { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_hit_from(value: &Value) -> Option<RowHit> {
    let pair = value.as_array()?;
    let text = pair.first()?.as_str()?.to_string();
    let href = pair.get(1).and_then(|v| v.as_str()).map(|s| s.to_string());
    Some(RowHit { text, href })
}
