//! Single-flight partial navigation.

use pn_core::NavResult;
use pn_dom::Document;
use pn_dom::Location;
use pn_net::ExchangeId;
use pn_net::FragmentRequest;
use pn_net::FragmentResponse;
use pn_net::Method;
use pn_net::with_partial_markers;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::alerts::show_alerts;
use crate::menu::highlight_menu;

/// Follow-up the session runs once a navigation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionHook {
    /// Re-activate the tab that was active when the form was submitted.
    ReselectTab(String),
    /// Submit the next form of a bulk save.
    ContinueBulkSave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
    pub update_history: bool,
    pub maintain_scroll: bool,
    pub alerts_only: bool,
    pub on_complete: Option<CompletionHook>,
}

impl NavigationRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            body: None,
            update_history: false,
            maintain_scroll: false,
            alerts_only: false,
            on_complete: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            body: Some(body.into()),
            ..Self::get(url)
        }
    }

    pub fn update_history(mut self, update: bool) -> Self {
        self.update_history = update;
        self
    }

    pub fn maintain_scroll(mut self, maintain: bool) -> Self {
        self.maintain_scroll = maintain;
        self
    }

    pub fn alerts_only(mut self, alerts_only: bool) -> Self {
        self.alerts_only = alerts_only;
        self
    }

    pub fn on_complete(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    pub is_loading: bool,
    pub last_path: String,
    pub last_hash: Option<String>,
    pub scroll_before_nav: Option<u32>,
}

/// Page services the controller calls while completing a navigation.
pub trait NavigationHost {
    fn document(&mut self) -> &mut Document;

    /// Location currently shown in the address bar.
    fn location(&self) -> Location;

    fn push_history(&mut self, location: Location);

    /// Re-binds forms, probes and tabs inside the freshly installed fragment.
    fn reinitialize(&mut self);

    fn content_ready(&mut self);

    fn record_pageview(&mut self, path: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Not the in-flight exchange.
    Ignored,
    Completed {
        /// 200, or 400 when the server rejected a submission.
        status: u16,
        alerts_only: bool,
        hook: Option<CompletionHook>,
    },
    /// Transport failure or unexpected status; the page must hard-redirect to `/`.
    Fatal,
}

#[derive(Debug)]
struct InFlight {
    id: ExchangeId,
    shown: Location,
    update_history: bool,
    alerts_only: bool,
    on_complete: Option<CompletionHook>,
}

#[derive(Debug)]
pub struct NavigationController {
    state: NavigationState,
    in_flight: Option<InFlight>,
}

impl NavigationController {
    pub fn new(initial: &Location) -> Self {
        Self {
            state: NavigationState {
                is_loading: false,
                last_path: initial.path.clone(),
                last_hash: initial.hash.clone(),
                scroll_before_nav: None,
            },
            in_flight: None,
        }
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn in_flight(&self) -> Option<ExchangeId> {
        self.in_flight.as_ref().map(|in_flight| in_flight.id)
    }

    /// Starts a navigation through `start`. Returns `Ok(None)` when one is already in flight.
    pub fn navigate(
        &mut self,
        doc: &mut Document,
        current: &Location,
        request: NavigationRequest,
        start: impl FnOnce(FragmentRequest) -> ExchangeId,
    ) -> NavResult<Option<ExchangeId>> {
        if self.in_flight.is_some() {
            debug!(target: "partialnav::nav", url = %request.url, "navigation dropped, another one is in flight");
            return Ok(None);
        }

        let shown = current.resolve(&request.url)?;
        let target = with_partial_markers(&shown.path_and_query(), request.alerts_only);

        doc.overlays.sidebar_open = false;
        doc.overlays.modal_open = false;
        self.state.scroll_before_nav = request.maintain_scroll.then_some(doc.scroll_top);
        doc.clear_notifications();
        highlight_menu(&mut doc.menu, &shown.path);

        let fragment_request = match (request.method, request.body) {
            (Method::Post, body) => FragmentRequest::post_form(target, body.unwrap_or_default()),
            (Method::Get, _) => FragmentRequest::get(target),
        };
        info!(
            target: "partialnav::nav",
            method = request.method.as_str(),
            url = %fragment_request.target,
            alerts_only = request.alerts_only,
            "navigating"
        );

        doc.loading_visible = true;
        self.state.is_loading = true;
        let id = start(fragment_request);
        self.in_flight = Some(InFlight {
            id,
            shown,
            update_history: request.update_history,
            alerts_only: request.alerts_only,
            on_complete: request.on_complete,
        });
        Ok(Some(id))
    }

    pub fn complete(
        &mut self,
        id: ExchangeId,
        result: NavResult<FragmentResponse>,
        host: &mut impl NavigationHost,
    ) -> NavigationOutcome {
        if self.in_flight() != Some(id) {
            debug!(target: "partialnav::nav", exchange = id.raw(), "ignoring stale navigation completion");
            return NavigationOutcome::Ignored;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return NavigationOutcome::Ignored;
        };
        self.state.is_loading = false;

        let response = match result {
            Ok(response) if matches!(response.status, 200 | 400) => response,
            Ok(response) => {
                warn!(target: "partialnav::nav", status = response.status, "unexpected navigation status");
                return self.fail(host);
            }
            Err(error) => {
                warn!(target: "partialnav::nav", %error, "navigation transport failure");
                return self.fail(host);
            }
        };

        let alerts_only = in_flight.alerts_only || response.status == 400;
        if in_flight.update_history {
            host.push_history(in_flight.shown.clone());
        }
        self.state.last_path = in_flight.shown.path.clone();
        self.state.last_hash = host.location().hash;

        let body = response.text();
        if alerts_only {
            show_alerts(host.document(), &body);
        } else {
            host.document().install_content(&body);
            host.reinitialize();
            host.content_ready();
            let path = host.location().path;
            host.record_pageview(&path);

            if let Some(scroll) = self.state.scroll_before_nav {
                host.document().scroll_top = scroll;
            }
        }

        self.state.scroll_before_nav = None;
        host.document().loading_visible = false;
        NavigationOutcome::Completed {
            status: response.status,
            alerts_only,
            hook: in_flight.on_complete,
        }
    }

    fn fail(&mut self, host: &mut impl NavigationHost) -> NavigationOutcome {
        self.state.scroll_before_nav = None;
        host.document().loading_visible = false;
        NavigationOutcome::Fatal
    }
}
