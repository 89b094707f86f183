//! Session coordinator: owns every component, dispatches gestures and routes
//! exchange completions back to the component that started them.

use std::collections::HashMap;
use std::time::Duration;

use pn_core::Clock;
use pn_core::Millis;
use pn_core::NavError;
use pn_core::NavResult;
use pn_dom::Button;
use pn_dom::ButtonKind;
use pn_dom::ControlId;
use pn_dom::Document;
use pn_dom::FormId;
use pn_dom::Location;
use pn_dom::Theme;
use pn_forms::FormSubmission;
use pn_forms::SubmitMode;
use pn_forms::UnsavedChangesTracker;
use pn_history::HistoryApi;
use pn_history::HistorySynchronizer;
use pn_history::PopStateAction;
use pn_history::SessionHistory;
use pn_nav::CompletionHook;
use pn_nav::NavigationController;
use pn_nav::NavigationHost;
use pn_nav::NavigationOutcome;
use pn_nav::NavigationRequest;
use pn_nav::NavigationState;
use pn_nav::highlight_menu;
use pn_net::Completion;
use pn_net::Exchange;
use pn_net::ExchangeId;
use pn_net::FragmentRequest;
use pn_net::FragmentResponse;
use pn_net::with_partial_markers;
use pn_perms::PermissionCache;
use pn_perms::ProbeAction;
use pn_storage::Preferences;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::SessionConfig;
use crate::gesture::CONFIRM_TEXT;
use crate::gesture::ConfirmPrompt;
use crate::gesture::Disposition;
use crate::gesture::Gesture;
use crate::gesture::delete_confirmation;

const REDIRECT_TARGET: &str = "/";

/// Side effects left to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A fragment was installed in the content region.
    ContentReady,
    /// Analytics pageview for the path now on screen.
    Pageview(String),
    /// Unrecoverable failure; the host performs a full page load of this URL.
    HardRedirect(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Purpose {
    Navigation,
    Probe(String),
    Widget(String),
}

/// The exchange, what each started exchange is for, and the cookies sent along.
struct Transport<E> {
    exchange: E,
    pending: HashMap<ExchangeId, Purpose>,
    preferences: Preferences,
}

impl<E: Exchange> Transport<E> {
    fn send(&mut self, request: FragmentRequest, purpose: Purpose) -> ExchangeId {
        let request = self.with_cookies(request);
        let id = self.exchange.start(request);
        debug!(target: "partialnav::session", exchange = id.raw(), ?purpose, "exchange started");
        self.pending.insert(id, purpose);
        id
    }

    fn with_cookies(&self, request: FragmentRequest) -> FragmentRequest {
        let path = request.target.split(['?', '#']).next().unwrap_or("/");
        let Some(cookies) = self.preferences.cookie_header(path) else {
            return request;
        };
        match request.clone().with_header("Cookie", &cookies) {
            Ok(request) => request,
            Err(error) => {
                warn!(target: "partialnav::session", %error, "sending request without cookies");
                request
            }
        }
    }
}

/// Borrowed view of the session handed to the navigation controller.
struct PageHost<'a, E, H> {
    document: &'a mut Document,
    history: &'a mut HistorySynchronizer<H>,
    tracker: &'a mut UnsavedChangesTracker,
    permissions: &'a mut PermissionCache,
    transport: &'a mut Transport<E>,
    events: &'a mut Vec<SessionEvent>,
    analytics: bool,
    now: Millis,
}

impl<E: Exchange, H: HistoryApi> PageHost<'_, E, H> {
    fn probe(&mut self, control: ControlId) {
        let Some(select) = self.document.select(control) else {
            return;
        };
        let Some(requirement) = select.probe else {
            return;
        };
        let channel = select.value.clone();

        let action = self
            .permissions
            .check(control, channel.as_deref(), requirement, self.now);
        self.document
            .set_status(control, action.immediate_status().status_line());

        if let (ProbeAction::Fetch { path }, Some(channel)) = (action, channel) {
            self.transport
                .send(FragmentRequest::get(path), Purpose::Probe(channel));
        }
    }

    fn probe_all(&mut self) {
        let controls: Vec<ControlId> = self
            .document
            .content()
            .selects
            .iter()
            .filter(|select| select.probe.is_some())
            .map(|select| select.id)
            .collect();
        for control in controls {
            self.probe(control);
        }
    }
}

impl<E: Exchange, H: HistoryApi> NavigationHost for PageHost<'_, E, H> {
    fn document(&mut self) -> &mut Document {
        self.document
    }

    fn location(&self) -> Location {
        self.history.location().clone()
    }

    fn push_history(&mut self, location: Location) {
        self.history.push_or_replace(location, true);
    }

    fn reinitialize(&mut self) {
        self.tracker.on_document_mutated(self.document);
        self.tracker.register_scope(self.document);
        self.probe_all();
    }

    fn content_ready(&mut self) {
        self.events.push(SessionEvent::ContentReady);
    }

    fn record_pageview(&mut self, path: &str) {
        if self.analytics {
            debug!(target: "partialnav::session", path, "pageview");
            self.events.push(SessionEvent::Pageview(path.to_owned()));
        }
    }
}

pub struct Session<E, K, H = SessionHistory> {
    config: SessionConfig,
    document: Document,
    history: HistorySynchronizer<H>,
    controller: NavigationController,
    permissions: PermissionCache,
    tracker: UnsavedChangesTracker,
    transport: Transport<E>,
    clock: K,
    events: Vec<SessionEvent>,
    /// Form whose popup-started save is the in-flight navigation.
    saving_form: Option<FormId>,
}

impl<E: Exchange, K: Clock, H: HistoryApi> Session<E, K, H> {
    /// Loads a full dashboard page and binds every control in it.
    pub fn start(
        config: SessionConfig,
        history: H,
        exchange: E,
        clock: K,
        page: &str,
    ) -> NavResult<Self> {
        let preferences = Preferences::load(config.storage())?;
        let mut document = Document::load(page);
        document.sidebar_collapsed = preferences.sidebar_collapsed();
        document.theme = if preferences.light_theme() {
            Theme::Light
        } else {
            Theme::Dark
        };

        let mut history = HistorySynchronizer::new(history);
        if let Some(anchor) = history.record_initial_location(document.visible_url()) {
            document.scroll_to_anchor(&anchor);
        }
        let location = history.location().clone();
        highlight_menu(&mut document.menu, &location.path);

        let mut session = Self {
            permissions: PermissionCache::new(config.guild_id.clone()),
            controller: NavigationController::new(&location),
            config,
            document,
            history,
            tracker: UnsavedChangesTracker::new(),
            transport: Transport {
                exchange,
                pending: HashMap::new(),
                preferences,
            },
            clock,
            events: Vec::new(),
            saving_form: None,
        };
        session.host().reinitialize();

        info!(
            target: "partialnav::session",
            location = %location.href(),
            forms = session.document.forms().len(),
            "session started"
        );
        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn location(&self) -> &Location {
        self.history.location()
    }

    pub fn history(&self) -> &H {
        self.history.history()
    }

    pub fn navigation(&self) -> &NavigationState {
        self.controller.state()
    }

    pub fn tracker(&self) -> &UnsavedChangesTracker {
        &self.tracker
    }

    pub fn permissions(&self) -> &PermissionCache {
        &self.permissions
    }

    pub fn preferences(&self) -> &Preferences {
        &self.transport.preferences
    }

    pub fn exchange(&self) -> &E {
        &self.transport.exchange
    }

    pub fn exchange_mut(&mut self) -> &mut E {
        &mut self.transport.exchange
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn dispatch(
        &mut self,
        gesture: Gesture,
        prompt: &mut impl ConfirmPrompt,
    ) -> NavResult<Disposition> {
        debug!(target: "partialnav::session", ?gesture, "dispatching gesture");
        match gesture {
            Gesture::ClickLink(href) => self.click_link(&href),
            Gesture::ClickAnchor(name) => Ok(self.click_anchor(&name)),
            Gesture::ClickButton(control) => self.click_button(control, prompt),
            Gesture::SelectTab(href) => Ok(if self.document.select_tab(&href) {
                Disposition::Handled
            } else {
                Disposition::Default
            }),
            Gesture::SubmitForm(form) => self.submit_form(form),
            Gesture::ChangeField { form, name, value } => {
                self.document.set_field_value(form, &name, &value)?;
                self.form_changed(form);
                Ok(Disposition::Handled)
            }
            Gesture::ChangeChecked {
                form,
                name,
                value,
                checked,
            } => {
                self.document.set_checked(form, &name, &value, checked)?;
                self.form_changed(form);
                Ok(Disposition::Handled)
            }
            Gesture::ChangeEditable { form, name, text } => {
                self.document.set_editable(form, &name, &text)?;
                self.form_changed(form);
                Ok(Disposition::Handled)
            }
            Gesture::ChangeSelect { control, value } => {
                if let Some(form) = self.document.set_select(control, &value)? {
                    self.form_changed(form);
                }
                self.host().probe(control);
                Ok(Disposition::Handled)
            }
            Gesture::ToggleSidebar => self.toggle_sidebar(),
            Gesture::ToggleTheme => self.toggle_theme(),
            Gesture::SaveUnsaved => self.save_unsaved(),
            Gesture::Back => self.traverse(-1),
            Gesture::Forward => self.traverse(1),
            Gesture::LoadWidget { slot, path } => self.load_widget(slot, &path),
        }
    }

    /// Routes every completion that is ready; returns how many were routed.
    pub fn pump(&mut self) -> usize {
        let mut routed = 0;
        while let Some(completion) = self.transport.exchange.try_complete() {
            self.route(completion);
            routed += 1;
        }
        routed
    }

    /// Waits for outstanding exchanges, giving up once `timeout` passes without one finishing.
    pub fn run_until_idle(&mut self, timeout: Duration) -> usize {
        let mut routed = self.pump();
        while self.transport.exchange.outstanding() > 0 {
            let Some(completion) = self.transport.exchange.wait_complete(timeout) else {
                warn!(
                    target: "partialnav::session",
                    outstanding = self.transport.exchange.outstanding(),
                    "timed out waiting for exchanges"
                );
                break;
            };
            self.route(completion);
            routed += 1;
        }
        routed
    }

    fn parts(&mut self) -> (&mut NavigationController, PageHost<'_, E, H>) {
        let now = self.clock.now_millis();
        (
            &mut self.controller,
            PageHost {
                document: &mut self.document,
                history: &mut self.history,
                tracker: &mut self.tracker,
                permissions: &mut self.permissions,
                transport: &mut self.transport,
                events: &mut self.events,
                analytics: self.config.analytics,
                now,
            },
        )
    }

    fn host(&mut self) -> PageHost<'_, E, H> {
        self.parts().1
    }

    fn navigate(&mut self, request: NavigationRequest) -> NavResult<Option<ExchangeId>> {
        let current = self.history.location().clone();
        let transport = &mut self.transport;
        self.controller
            .navigate(&mut self.document, &current, request, |fragment| {
                transport.send(fragment, Purpose::Navigation)
            })
    }

    fn click_link(&mut self, href: &str) -> NavResult<Disposition> {
        let partial = self
            .document
            .content()
            .partial_links
            .iter()
            .any(|link| link == href)
            || self
                .document
                .menu
                .entries
                .iter()
                .any(|entry| entry.partial && entry.href == href);
        if !partial {
            return Ok(Disposition::Default);
        }

        self.navigate(NavigationRequest::get(href).update_history(true))?;
        Ok(Disposition::Handled)
    }

    fn click_anchor(&mut self, name: &str) -> Disposition {
        let name = name.trim_start_matches('#');
        if !self.document.scroll_to_anchor(name) {
            debug!(target: "partialnav::session", anchor = name, "no such anchor");
            return Disposition::Default;
        }
        self.history.push_hash(name);
        Disposition::Handled
    }

    fn click_button(
        &mut self,
        control: ControlId,
        prompt: &mut impl ConfirmPrompt,
    ) -> NavResult<Disposition> {
        let button = self.document.button(control).cloned().ok_or_else(|| {
            NavError::new(
                "session.control_unknown",
                format!("button {} is not attached", control.raw()),
            )
        })?;

        let Some(action) = button.formaction.clone() else {
            if button.is_destructive() && !button.noconfirm && !prompt.confirm(CONFIRM_TEXT) {
                info!(target: "partialnav::session", control = control.raw(), "confirmation declined");
                return Ok(Disposition::Suppressed);
            }
            if button.kind != ButtonKind::Submit {
                return Ok(Disposition::Default);
            }
            return match self.owning_form(&button) {
                Some(form) => self.submit_form(form),
                None => Ok(Disposition::Default),
            };
        };

        if button.is_destructive() || button.open_confirm {
            let message = match &button.title {
                Some(title) => delete_confirmation(title),
                None => CONFIRM_TEXT.to_owned(),
            };
            if !prompt.confirm(&message) {
                info!(target: "partialnav::session", control = control.raw(), "confirmation declined");
                return Ok(Disposition::Suppressed);
            }
        }

        let Some(form) = self.owning_form(&button) else {
            return Ok(Disposition::Default);
        };
        if !self.document.form(form).is_some_and(|form| form.is_async) {
            return Ok(Disposition::Default);
        }
        self.post_form(form, Some(action), button.alerts_only)?;
        Ok(Disposition::Handled)
    }

    /// Ancestor form first, then the `form="id"` attribute.
    fn owning_form(&self, button: &Button) -> Option<FormId> {
        button.form.or_else(|| {
            let dom_id = button.form_attr.as_deref()?;
            self.document.form_by_dom_id(dom_id).map(|form| form.id)
        })
    }

    fn submit_form(&mut self, form: FormId) -> NavResult<Disposition> {
        let is_async = self
            .document
            .form(form)
            .ok_or_else(|| form_unknown(form))?
            .is_async;
        if !is_async {
            return Ok(Disposition::Default);
        }
        self.post_form(form, None, false)?;
        Ok(Disposition::Handled)
    }

    /// Async-form submit: POST with scroll kept and the active tab re-selected afterwards.
    fn post_form(
        &mut self,
        form: FormId,
        action: Option<String>,
        alerts_only: bool,
    ) -> NavResult<Option<ExchangeId>> {
        let target = self.document.form(form).ok_or_else(|| form_unknown(form))?;
        let url = action
            .or_else(|| target.action.clone())
            .unwrap_or_else(|| self.history.location().path.clone());
        let alerts_only = alerts_only || target.alerts_only;
        let body = target.snapshot().into_body();

        let mut request = NavigationRequest::post(url, body)
            .maintain_scroll(true)
            .alerts_only(alerts_only);
        if let Some(tab) = self.document.active_tab() {
            request = request.on_complete(CompletionHook::ReselectTab(tab.to_owned()));
        }
        self.navigate(request)
    }

    fn form_changed(&mut self, form: FormId) {
        let dirty = self.tracker.on_form_changed(&mut self.document, form);
        debug!(target: "partialnav::session", form = form.raw(), dirty, "form changed");
    }

    fn save_unsaved(&mut self) -> NavResult<Disposition> {
        if self.controller.in_flight().is_some() {
            debug!(target: "partialnav::session", "save ignored while a navigation is in flight");
            return Ok(Disposition::Handled);
        }
        if let Some(submission) = self.tracker.begin_save(&mut self.document) {
            self.submit(submission)?;
        }
        Ok(Disposition::Handled)
    }

    fn submit(&mut self, submission: FormSubmission) -> NavResult<()> {
        let form = submission.form;
        let started = match submission.mode {
            SubmitMode::Direct => self.post_form(form, None, false)?,
            SubmitMode::Bulk => {
                let url = self
                    .document
                    .form(submission.form)
                    .and_then(|form| form.action.clone())
                    .unwrap_or_else(|| self.history.location().path.clone());
                let request = NavigationRequest::post(url, submission.body.into_body())
                    .maintain_scroll(true)
                    .alerts_only(true)
                    .on_complete(CompletionHook::ContinueBulkSave);
                self.navigate(request)?
            }
        };
        match started {
            Some(_) => self.saving_form = Some(form),
            None => self.tracker.finish_save(&mut self.document, form, false),
        }
        Ok(())
    }

    fn toggle_sidebar(&mut self) -> NavResult<Disposition> {
        let collapsed = !self.document.sidebar_collapsed;
        self.transport.preferences.set_sidebar_collapsed(collapsed)?;
        self.document.sidebar_collapsed = collapsed;
        info!(target: "partialnav::session", collapsed, "sidebar toggled");
        Ok(Disposition::Handled)
    }

    fn toggle_theme(&mut self) -> NavResult<Disposition> {
        let light = self.document.theme == Theme::Dark;
        self.transport.preferences.set_light_theme(light)?;
        self.document.theme = if light { Theme::Light } else { Theme::Dark };
        info!(target: "partialnav::session", light, "theme toggled");
        Ok(Disposition::Handled)
    }

    fn traverse(&mut self, delta: isize) -> NavResult<Disposition> {
        let Some(popped) = self.history.history_mut().go(delta) else {
            return Ok(Disposition::Default);
        };

        match self
            .history
            .on_pop_state(&popped, &self.controller.state().last_path)
        {
            PopStateAction::Navigate(path) => {
                self.navigate(NavigationRequest::get(path))?;
            }
            PopStateAction::Ignore => {
                if let Some(hash) = &popped.hash {
                    self.document.scroll_to_anchor(hash);
                }
            }
        }
        Ok(Disposition::Handled)
    }

    fn load_widget(&mut self, slot: String, path: &str) -> NavResult<Disposition> {
        let location = self.history.location().resolve(path)?;
        let target = with_partial_markers(&location.path_and_query(), false);
        self.transport
            .send(FragmentRequest::get(target), Purpose::Widget(slot));
        Ok(Disposition::Handled)
    }

    fn route(&mut self, completion: Completion) {
        let Completion { id, result } = completion;
        let Some(purpose) = self.transport.pending.remove(&id) else {
            debug!(target: "partialnav::session", exchange = id.raw(), "completion for unknown exchange");
            return;
        };

        match purpose {
            Purpose::Navigation => self.finish_navigation(id, result),
            Purpose::Probe(channel) => self.finish_probe(&channel, result),
            Purpose::Widget(slot) => self.finish_widget(&slot, result),
        }
    }

    fn finish_navigation(&mut self, id: ExchangeId, result: NavResult<FragmentResponse>) {
        let (controller, mut host) = self.parts();
        let outcome = controller.complete(id, result, &mut host);
        let accepted = match &outcome {
            NavigationOutcome::Ignored => None,
            NavigationOutcome::Completed { status, .. } => Some(*status != 400),
            NavigationOutcome::Fatal => Some(false),
        };
        if let Some(accepted) = accepted {
            if let Some(form) = self.saving_form.take() {
                self.tracker.finish_save(&mut self.document, form, accepted);
            }
        }
        match outcome {
            NavigationOutcome::Ignored | NavigationOutcome::Completed { hook: None, .. } => {}
            NavigationOutcome::Completed {
                hook: Some(hook), ..
            } => self.run_hook(hook),
            NavigationOutcome::Fatal => self.hard_redirect(),
        }
    }

    fn run_hook(&mut self, hook: CompletionHook) {
        match hook {
            CompletionHook::ReselectTab(href) => {
                if !self.document.select_tab(&href) {
                    debug!(target: "partialnav::session", tab = %href, "tab gone after navigation");
                }
            }
            CompletionHook::ContinueBulkSave => {
                let Some(next) = self.tracker.continue_save(&mut self.document) else {
                    return;
                };
                if let Err(error) = self.submit(next) {
                    warn!(target: "partialnav::session", %error, "bulk save step could not start");
                }
            }
        }
    }

    fn finish_probe(&mut self, channel: &str, result: NavResult<FragmentResponse>) {
        let now = self.clock.now_millis();
        for (control, status) in self.permissions.resolve(channel, result, now) {
            self.document.set_status(control, status.status_line());
        }
    }

    fn finish_widget(&mut self, slot: &str, result: NavResult<FragmentResponse>) {
        match result {
            Ok(response) => {
                debug!(target: "partialnav::session", slot, status = response.status, "widget loaded");
                self.document.set_widget(slot, response.text());
            }
            Err(error) => {
                warn!(target: "partialnav::session", slot, %error, "widget load failed");
                self.hard_redirect();
            }
        }
    }

    fn hard_redirect(&mut self) {
        warn!(target: "partialnav::session", target_url = REDIRECT_TARGET, "hard redirect");
        self.events
            .push(SessionEvent::HardRedirect(REDIRECT_TARGET.to_owned()));
    }
}

fn form_unknown(form: FormId) -> NavError {
    NavError::new(
        "session.form_unknown",
        format!("form {} is not attached", form.raw()),
    )
}

#[cfg(test)]
mod tests {
    use super::Session;
    use super::SessionEvent;
    use crate::config::SessionConfig;
    use crate::gesture::CONFIRM_TEXT;
    use crate::gesture::ConfirmPrompt;
    use crate::gesture::Disposition;
    use crate::gesture::Gesture;
    use pn_core::ManualClock;
    use pn_core::NavError;
    use pn_dom::ControlId;
    use pn_dom::FormId;
    use pn_dom::Location;
    use pn_dom::NotificationKind;
    use pn_dom::StatusTone;
    use pn_dom::Theme;
    use pn_forms::MULTI_FORM_PROMPT;
    use pn_history::SessionHistory;
    use pn_net::FragmentRequest;
    use pn_net::FragmentResponse;
    use pn_net::Method;
    use pn_net::ScriptedExchange;
    use pn_perms::PERMISSION_TTL_MS;

    type TestSession = Session<ScriptedExchange, ManualClock>;

    const PAGE: &str = r##"<html><body data-visible-url="/manage/99/settings">
        <nav id="menu">
            <a class="nav-link" data-partial-load href="/manage/99/">Home</a>
            <div class="nav-parent"><a class="nav-link" data-partial-load href="/manage/99/settings">Settings</a></div>
        </nav>
        <div id="main-content">
            <div class="tabs"><a href="#general" class="active">General</a><a href="#advanced">Advanced</a></div>
            <form data-async-form id="settings" action="/manage/99/settings">
                <input name="prefix" value="-">
                <select name="channel" data-requireperms-send><option value="">None</option><option value="42" selected>general</option></select>
                <button type="submit">Save</button>
            </form>
            <form data-async-form id="motd"><input name="motd" value="hi"></form>
            <button class="btn-danger" formaction="/manage/99/settings/reset" form="settings" title="settings">Reset</button>
            <button class="btn-danger" type="button">Danger</button>
            <a data-partial-load href="/manage/99/logs">Logs</a>
            <a name="bottom"></a>
        </div>
    </body></html>"##;

    const THREE_FORMS: &str = r#"<html><body data-visible-url="/manage/99/bot">
        <div id="main-content">
            <form data-async-form id="name" action="/manage/99/bot/name"><input name="name" value="bot"></form>
            <form data-async-form id="avatar" action="/manage/99/bot/avatar"><input name="avatar" value="a.png"></form>
            <form data-async-form id="status" action="/manage/99/bot/status"><input name="status" value="idle"></form>
        </div>
    </body></html>"#;

    const SETTINGS_FRAGMENT: &str = r##"<div class="tabs"><a href="#general" class="active">General</a><a href="#advanced">Advanced</a></div><form data-async-form id="settings"><input name="prefix" value="x"></form>"##;

    struct Prompt {
        answer: bool,
        asked: Vec<String>,
    }

    impl ConfirmPrompt for Prompt {
        fn confirm(&mut self, message: &str) -> bool {
            self.asked.push(message.to_owned());
            self.answer
        }
    }

    fn accept() -> Prompt {
        Prompt {
            answer: true,
            asked: Vec::new(),
        }
    }

    fn decline() -> Prompt {
        Prompt {
            answer: false,
            asked: Vec::new(),
        }
    }

    fn session_with(config: SessionConfig) -> TestSession {
        session_on(config, PAGE)
    }

    fn session_on(config: SessionConfig, page: &str) -> TestSession {
        let initial = match Location::parse("/manage/99/") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        match Session::start(
            config.with_guild("99"),
            SessionHistory::new(initial),
            ScriptedExchange::new(),
            ManualClock::starting_at(1_000),
            page,
        ) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn session() -> TestSession {
        session_with(SessionConfig::default())
    }

    fn dispatch(session: &mut TestSession, gesture: Gesture, prompt: &mut Prompt) -> Disposition {
        match session.dispatch(gesture, prompt) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn targets(session: &TestSession) -> Vec<String> {
        session
            .exchange()
            .started()
            .iter()
            .map(|(_, request)| request.target.clone())
            .collect()
    }

    fn last_request(session: &TestSession) -> FragmentRequest {
        match session.exchange().last_started() {
            Some((_, request)) => request.clone(),
            None => panic!("no request was started"),
        }
    }

    /// Finishes the newest request sent to `target` and routes the completion.
    fn respond(session: &mut TestSession, target: &str, response: FragmentResponse) {
        let id = session
            .exchange()
            .started()
            .iter()
            .rev()
            .find(|(_, request)| request.target == target)
            .map(|(id, _)| *id);
        let Some(id) = id else {
            panic!("no request for {target}");
        };
        assert!(session.exchange_mut().resolve(id, Ok(response)));
        assert_eq!(session.pump(), 1);
    }

    fn respond_last(session: &mut TestSession, response: FragmentResponse) {
        let target = last_request(session).target;
        respond(session, &target, response);
    }

    fn form_id(session: &TestSession, dom_id: &str) -> FormId {
        match session.document().form_by_dom_id(dom_id) {
            Some(form) => form.id,
            None => panic!("no form #{dom_id}"),
        }
    }

    fn button_id(session: &TestSession, label: &str) -> ControlId {
        match session
            .document()
            .content()
            .buttons
            .iter()
            .find(|button| button.label == label)
        {
            Some(button) => button.id,
            None => panic!("no button {label}"),
        }
    }

    fn channel_select(session: &TestSession) -> ControlId {
        match session.document().content().selects.first() {
            Some(select) => select.id,
            None => panic!("no select"),
        }
    }

    fn status_tone(session: &TestSession, control: ControlId) -> Option<StatusTone> {
        session.document().status(control).map(|line| line.tone)
    }

    #[test]
    fn start_applies_the_visible_url_and_probes_permission_selects() {
        let mut session = session();

        assert_eq!(session.location().href(), "/manage/99/settings");
        assert!(session.document().menu.entries[1].active);
        assert!(session.document().menu.groups[0].expanded);
        assert_eq!(targets(&session), vec!["/api/99/channelperms/42"]);

        let select = channel_select(&session);
        assert_eq!(status_tone(&session, select), Some(StatusTone::Checking));

        respond(&mut session, "/api/99/channelperms/42", FragmentResponse::new(200, "3072"));
        assert_eq!(status_tone(&session, select), Some(StatusTone::Satisfied));
        assert!(session.events().is_empty());
    }

    #[test]
    fn partial_links_fetch_fragments_and_push_history() {
        let mut session = session_with(SessionConfig::default().with_analytics(true));
        let mut prompt = accept();

        assert_eq!(
            dispatch(&mut session, Gesture::ClickLink("https://example.com/".to_owned()), &mut prompt),
            Disposition::Default
        );
        assert_eq!(
            dispatch(&mut session, Gesture::ClickLink("/manage/99/logs".to_owned()), &mut prompt),
            Disposition::Handled
        );
        assert_eq!(
            dispatch(&mut session, Gesture::ClickLink("/manage/99/".to_owned()), &mut prompt),
            Disposition::Handled
        );
        assert_eq!(
            targets(&session),
            vec!["/api/99/channelperms/42", "/manage/99/logs?partial=1"]
        );
        assert!(session.document().loading_visible);

        respond(&mut session, "/manage/99/logs?partial=1", FragmentResponse::new(200, "<p>logs</p>"));

        assert_eq!(session.document().content().html, "<p>logs</p>");
        assert_eq!(session.location().href(), "/manage/99/logs");
        assert_eq!(session.history().entries().len(), 2);
        assert_eq!(session.navigation().last_path, "/manage/99/logs");
        assert!(!session.document().loading_visible);
        assert_eq!(
            session.drain_events(),
            vec![
                SessionEvent::ContentReady,
                SessionEvent::Pageview("/manage/99/logs".to_owned())
            ]
        );
    }

    #[test]
    fn async_submit_posts_the_form_and_reselects_the_active_tab() {
        let mut session = session();
        let mut prompt = accept();
        let form = form_id(&session, "settings");

        assert_eq!(
            dispatch(&mut session, Gesture::SelectTab("#advanced".to_owned()), &mut prompt),
            Disposition::Handled
        );
        dispatch(
            &mut session,
            Gesture::ChangeField {
                form,
                name: "prefix".to_owned(),
                value: "x".to_owned(),
            },
            &mut prompt,
        );
        assert!(session.document().unsaved_popup.visible);

        assert_eq!(
            dispatch(&mut session, Gesture::SubmitForm(form), &mut prompt),
            Disposition::Handled
        );
        let request = last_request(&session);
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.target, "/manage/99/settings?partial=1");
        assert_eq!(request.body.as_deref(), Some("prefix=x&channel=42"));

        respond_last(&mut session, FragmentResponse::new(200, SETTINGS_FRAGMENT));

        assert_eq!(session.document().active_tab(), Some("#advanced"));
        assert!(session.tracker().dirty_forms().is_empty());
        assert!(!session.document().unsaved_popup.visible);
        assert_eq!(session.location().href(), "/manage/99/settings");
        assert_eq!(session.history().entries().len(), 1);
    }

    #[test]
    fn bad_request_renders_alerts_and_keeps_the_content() {
        let mut session = session();
        let mut prompt = accept();
        let form = form_id(&session, "settings");
        let before = session.document().content().html.clone();

        dispatch(
            &mut session,
            Gesture::ChangeField {
                form,
                name: "prefix".to_owned(),
                value: String::new(),
            },
            &mut prompt,
        );
        dispatch(&mut session, Gesture::SubmitForm(form), &mut prompt);
        respond_last(
            &mut session,
            FragmentResponse::new(400, r#"[{"Style":"danger","Message":"Prefix can't be empty"}]"#),
        );

        assert_eq!(session.document().content().html, before);
        assert_eq!(session.document().notifications().len(), 1);
        assert_eq!(session.document().notifications()[0].kind, NotificationKind::Error);
        assert!(!session.document().loading_visible);
        assert!(session.document().unsaved_popup.visible);
        assert!(session.events().is_empty());
    }

    #[test]
    fn declined_confirmation_suppresses_destructive_buttons() {
        let mut session = session();
        let danger = button_id(&session, "Danger");
        let reset = button_id(&session, "Reset");

        let mut declining = decline();
        assert_eq!(
            dispatch(&mut session, Gesture::ClickButton(danger), &mut declining),
            Disposition::Suppressed
        );
        assert_eq!(
            dispatch(&mut session, Gesture::ClickButton(reset), &mut declining),
            Disposition::Suppressed
        );
        assert_eq!(
            declining.asked,
            vec![
                CONFIRM_TEXT.to_owned(),
                "Deleting settings. Are you sure you want to do this?".to_owned()
            ]
        );
        assert_eq!(targets(&session).len(), 1);

        let mut accepting = accept();
        assert_eq!(
            dispatch(&mut session, Gesture::ClickButton(reset), &mut accepting),
            Disposition::Handled
        );
        let request = last_request(&session);
        assert_eq!(request.target, "/manage/99/settings/reset?partial=1");
        assert_eq!(request.body.as_deref(), Some("prefix=-&channel=42"));

        assert_eq!(
            dispatch(&mut session, Gesture::ClickButton(danger), &mut accepting),
            Disposition::Default
        );
    }

    #[test]
    fn failed_navigation_requests_a_hard_redirect() {
        let mut session = session();
        let mut prompt = accept();
        let save = button_id(&session, "Save");

        assert_eq!(
            dispatch(&mut session, Gesture::ClickButton(save), &mut prompt),
            Disposition::Handled
        );
        assert!(prompt.asked.is_empty());
        respond_last(&mut session, FragmentResponse::new(502, "Bad Gateway"));

        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::HardRedirect("/".to_owned())]
        );
        assert!(!session.document().loading_visible);
        assert!(!session.navigation().is_loading);
    }

    fn change(session: &mut TestSession, form: FormId, name: &str, value: &str) {
        dispatch(
            session,
            Gesture::ChangeField {
                form,
                name: name.to_owned(),
                value: value.to_owned(),
            },
            &mut accept(),
        );
    }

    #[test]
    fn bulk_save_submits_dirty_forms_last_in_first_out() {
        let mut session = session_on(SessionConfig::default(), THREE_FORMS);
        let mut prompt = accept();
        let name = form_id(&session, "name");
        let avatar = form_id(&session, "avatar");
        let status = form_id(&session, "status");

        change(&mut session, name, "name", "partialbot");
        change(&mut session, avatar, "avatar", "b.png");
        change(&mut session, status, "status", "online");
        assert_eq!(session.tracker().dirty_forms(), &[name, avatar, status]);
        assert_eq!(session.document().unsaved_popup.message, MULTI_FORM_PROMPT);

        dispatch(&mut session, Gesture::SaveUnsaved, &mut prompt);
        let first = last_request(&session);
        assert_eq!(first.target, "/manage/99/bot/status?partial=1&alertsonly=1");
        assert_eq!(first.body.as_deref(), Some("status=online"));
        assert!(session.tracker().is_saving());
        assert!(!session.document().unsaved_popup.save_button_visible);

        respond_last(&mut session, FragmentResponse::new(200, "[]"));
        let second = last_request(&session);
        assert_eq!(second.target, "/manage/99/bot/avatar?partial=1&alertsonly=1");
        assert_eq!(second.body.as_deref(), Some("avatar=b.png"));

        respond_last(&mut session, FragmentResponse::new(200, "[]"));
        let third = last_request(&session);
        assert_eq!(third.target, "/manage/99/bot/name?partial=1&alertsonly=1");
        assert_eq!(third.body.as_deref(), Some("name=partialbot"));

        respond_last(
            &mut session,
            FragmentResponse::new(200, r#"[{"Style":"success","Message":"Saved"}]"#),
        );
        assert_eq!(targets(&session).len(), 3);
        assert!(!session.tracker().is_saving());
        assert!(session.tracker().dirty_forms().is_empty());
        assert!(!session.document().unsaved_popup.visible);
        assert_eq!(session.document().notifications().len(), 1);
        assert!(!session.document().loading_visible);
    }

    #[test]
    fn popup_save_rejected_with_bad_request_stays_dirty() {
        let mut session = session();
        let mut prompt = accept();
        let motd = form_id(&session, "motd");

        change(&mut session, motd, "motd", "bye");
        dispatch(&mut session, Gesture::SaveUnsaved, &mut prompt);
        assert_eq!(last_request(&session).body.as_deref(), Some("motd=bye"));
        assert!(!session.document().unsaved_popup.visible);

        respond_last(
            &mut session,
            FragmentResponse::new(400, r#"[{"Style":"danger","Message":"Too long"}]"#),
        );
        assert_eq!(session.tracker().dirty_forms(), &[motd]);
        assert!(session.document().unsaved_popup.visible);
        assert_eq!(session.document().notifications().len(), 1);

        change(&mut session, motd, "motd", "bye");
        assert_eq!(session.tracker().dirty_forms(), &[motd]);
        assert!(session.document().unsaved_popup.visible);
    }

    #[test]
    fn bulk_save_rejections_come_back_once_the_sequence_ends() {
        let mut session = session_on(SessionConfig::default(), THREE_FORMS);
        let mut prompt = accept();
        let name = form_id(&session, "name");
        let avatar = form_id(&session, "avatar");

        change(&mut session, name, "name", "partialbot");
        change(&mut session, avatar, "avatar", "b.png");
        dispatch(&mut session, Gesture::SaveUnsaved, &mut prompt);

        respond_last(&mut session, FragmentResponse::new(400, "[]"));
        assert_eq!(last_request(&session).body.as_deref(), Some("name=partialbot"));
        assert!(session.tracker().is_saving());

        respond_last(&mut session, FragmentResponse::new(200, "[]"));
        assert_eq!(targets(&session).len(), 2);
        assert!(!session.tracker().is_saving());
        assert_eq!(session.tracker().dirty_forms(), &[avatar]);
        assert!(session.document().unsaved_popup.visible);
        assert!(session.document().unsaved_popup.save_button_visible);
    }

    #[test]
    fn select_changes_reuse_fresh_permissions_until_they_expire() {
        let mut session = session();
        let mut prompt = accept();
        let select = channel_select(&session);
        respond(&mut session, "/api/99/channelperms/42", FragmentResponse::new(200, "3072"));

        dispatch(
            &mut session,
            Gesture::ChangeSelect {
                control: select,
                value: String::new(),
            },
            &mut prompt,
        );
        assert_eq!(status_tone(&session, select), Some(StatusTone::Neutral));

        dispatch(
            &mut session,
            Gesture::ChangeSelect {
                control: select,
                value: "42".to_owned(),
            },
            &mut prompt,
        );
        assert_eq!(status_tone(&session, select), Some(StatusTone::Satisfied));
        assert_eq!(targets(&session).len(), 1);

        session.clock().advance(PERMISSION_TTL_MS);
        dispatch(
            &mut session,
            Gesture::ChangeSelect {
                control: select,
                value: "42".to_owned(),
            },
            &mut prompt,
        );
        assert_eq!(targets(&session).len(), 2);
        assert_eq!(status_tone(&session, select), Some(StatusTone::Checking));

        respond_last(
            &mut session,
            FragmentResponse::new(403, r#"{"message":"Unknown channel"}"#),
        );
        let line = session.document().status(select).cloned();
        assert_eq!(line.as_ref().map(|line| line.tone), Some(StatusTone::Failed));
        assert_eq!(line.map(|line| line.text), Some("Unknown channel".to_owned()));
    }

    #[test]
    fn anchors_and_history_traversal_follow_the_path() {
        let mut session = session();
        let mut prompt = accept();

        assert_eq!(
            dispatch(&mut session, Gesture::ClickAnchor("#missing".to_owned()), &mut prompt),
            Disposition::Default
        );
        assert_eq!(
            dispatch(&mut session, Gesture::ClickAnchor("#bottom".to_owned()), &mut prompt),
            Disposition::Handled
        );
        assert_eq!(session.document().scrolled_anchor.as_deref(), Some("bottom"));
        assert_eq!(session.location().href(), "/manage/99/settings#bottom");

        assert_eq!(dispatch(&mut session, Gesture::Back, &mut prompt), Disposition::Handled);
        assert_eq!(dispatch(&mut session, Gesture::Forward, &mut prompt), Disposition::Handled);
        assert_eq!(targets(&session).len(), 1);
        assert_eq!(dispatch(&mut session, Gesture::Forward, &mut prompt), Disposition::Default);

        dispatch(&mut session, Gesture::ClickLink("/manage/99/logs".to_owned()), &mut prompt);
        respond_last(&mut session, FragmentResponse::new(200, "<p>logs</p>"));
        assert_eq!(session.history().entries().len(), 3);

        assert_eq!(dispatch(&mut session, Gesture::Back, &mut prompt), Disposition::Handled);
        let request = last_request(&session);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.target, "/manage/99/settings?partial=1");

        respond_last(&mut session, FragmentResponse::new(200, SETTINGS_FRAGMENT));
        assert_eq!(session.history().entries().len(), 3);
        assert_eq!(session.location().href(), "/manage/99/settings#bottom");
        assert_eq!(session.navigation().last_path, "/manage/99/settings");
    }

    #[test]
    fn preference_toggles_travel_as_cookies() {
        let mut session = session();
        let mut prompt = accept();

        dispatch(&mut session, Gesture::ToggleSidebar, &mut prompt);
        dispatch(&mut session, Gesture::ToggleTheme, &mut prompt);
        assert!(session.document().sidebar_collapsed);
        assert_eq!(session.document().theme, Theme::Light);
        assert!(session.preferences().sidebar_collapsed());

        dispatch(&mut session, Gesture::ClickLink("/manage/99/logs".to_owned()), &mut prompt);
        assert_eq!(
            last_request(&session).header("Cookie"),
            Some("light_theme=true; sidebar_collapsed=true")
        );

        dispatch(&mut session, Gesture::ToggleTheme, &mut prompt);
        assert_eq!(session.document().theme, Theme::Dark);
        assert!(!session.preferences().light_theme());
    }

    #[test]
    fn widgets_load_into_their_slot_without_navigating() {
        let mut session = session();
        let mut prompt = accept();

        dispatch(
            &mut session,
            Gesture::LoadWidget {
                slot: "stats".to_owned(),
                path: "/manage/99/stats".to_owned(),
            },
            &mut prompt,
        );
        assert_eq!(last_request(&session).target, "/manage/99/stats?partial=1");
        assert!(!session.document().loading_visible);

        respond_last(&mut session, FragmentResponse::new(200, "<b>5 servers</b>"));
        assert_eq!(session.document().widget("stats"), Some("<b>5 servers</b>"));
        assert_eq!(session.location().href(), "/manage/99/settings");
        assert!(session.events().is_empty());

        dispatch(
            &mut session,
            Gesture::LoadWidget {
                slot: "stats".to_owned(),
                path: "/manage/99/stats".to_owned(),
            },
            &mut prompt,
        );
        let pending = session.exchange().pending().last().copied();
        let Some(id) = pending else {
            panic!("widget request was not started");
        };
        assert!(session
            .exchange_mut()
            .resolve(id, Err(NavError::new("net.transport.connect_failed", "refused"))));
        session.pump();
        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::HardRedirect("/".to_owned())]
        );
    }
}
