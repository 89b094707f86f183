//! Headless page state mutated by the navigation layer.

use std::collections::BTreeMap;

use pn_core::NavError;
use pn_core::NavResult;

use crate::form::ControlId;
use crate::form::Form;
use crate::form::FormId;
use crate::form::HandleAllocator;
use crate::scan;
use crate::scan::Button;
use crate::scan::Fragment;
use crate::scan::Menu;
use crate::scan::SelectControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub text: Option<String>,
    /// `None` keeps the notification until dismissed.
    pub auto_dismiss_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Neutral,
    Checking,
    Satisfied,
    Missing,
    Failed,
}

/// Status text shown next to a permission select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub tone: StatusTone,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedPopup {
    pub visible: bool,
    pub message: String,
    pub save_button_visible: bool,
}

impl Default for UnsavedPopup {
    fn default() -> Self {
        Self {
            visible: false,
            message: String::new(),
            save_button_visible: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overlays {
    pub sidebar_open: bool,
    pub modal_open: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Default)]
pub struct Document {
    visible_url: Option<String>,
    content: Fragment,
    handles: HandleAllocator,
    content_generation: u64,
    notifications: Vec<Notification>,
    status_lines: BTreeMap<ControlId, StatusLine>,
    widgets: BTreeMap<String, String>,
    pub menu: Menu,
    pub overlays: Overlays,
    pub loading_visible: bool,
    pub scroll_top: u32,
    pub scrolled_anchor: Option<String>,
    pub unsaved_popup: UnsavedPopup,
    pub theme: Theme,
    pub sidebar_collapsed: bool,
}

impl Document {
    /// Builds the document from a full page: shell hooks plus the content region.
    pub fn load(source: &str) -> Self {
        let page = scan::scan_page(source);
        let mut document = Self {
            visible_url: page.visible_url,
            menu: page.menu,
            ..Self::default()
        };
        document.install_content(&page.content_html);
        document
    }

    /// `data-visible-url` carried by the page body, if any.
    pub fn visible_url(&self) -> Option<&str> {
        self.visible_url.as_deref()
    }

    pub fn content(&self) -> &Fragment {
        &self.content
    }

    /// Bumped on every content swap.
    pub fn content_generation(&self) -> u64 {
        self.content_generation
    }

    /// Replaces the content region. Handles from the previous fragment become detached.
    pub fn install_content(&mut self, html: &str) -> &Fragment {
        self.content = scan::scan_fragment(html, &mut self.handles);
        self.content_generation += 1;
        self.status_lines.clear();
        &self.content
    }

    pub fn forms(&self) -> &[Form] {
        &self.content.forms
    }

    pub fn form(&self, id: FormId) -> Option<&Form> {
        self.content.forms.iter().find(|form| form.id == id)
    }

    pub fn contains_form(&self, id: FormId) -> bool {
        self.form(id).is_some()
    }

    pub fn form_by_dom_id(&self, dom_id: &str) -> Option<&Form> {
        self.content
            .forms
            .iter()
            .find(|form| form.dom_id.as_deref() == Some(dom_id))
    }

    pub fn button(&self, id: ControlId) -> Option<&Button> {
        self.content.buttons.iter().find(|button| button.id == id)
    }

    pub fn select(&self, id: ControlId) -> Option<&SelectControl> {
        self.content.selects.iter().find(|select| select.id == id)
    }

    pub fn set_field_value(&mut self, form: FormId, name: &str, value: &str) -> NavResult<()> {
        let target = self.form_mut(form)?;
        if target.set_value(name, value) {
            return Ok(());
        }
        Err(field_unknown(form, name))
    }

    pub fn set_checked(
        &mut self,
        form: FormId,
        name: &str,
        value: &str,
        checked: bool,
    ) -> NavResult<()> {
        let target = self.form_mut(form)?;
        if target.set_checked(name, value, checked) {
            return Ok(());
        }
        Err(field_unknown(form, name))
    }

    pub fn set_editable(&mut self, form: FormId, name: &str, text: &str) -> NavResult<()> {
        let target = self.form_mut(form)?;
        if target.set_editable(name, text) {
            return Ok(());
        }
        Err(field_unknown(form, name))
    }

    /// Changes a select's value. Returns the owning form when the select is a form field.
    pub fn set_select(&mut self, control: ControlId, value: &str) -> NavResult<Option<FormId>> {
        let select = self
            .content
            .selects
            .iter_mut()
            .find(|select| select.id == control)
            .ok_or_else(|| {
                NavError::new(
                    "dom.control_unknown",
                    format!("select {} is not attached", control.raw()),
                )
            })?;

        if !value.is_empty() && !select.options.iter().any(|option| option == value) {
            return Err(NavError::new(
                "dom.option_unknown",
                format!("select {} has no option `{value}`", control.raw()),
            ));
        }

        select.value = Some(value.to_owned()).filter(|value| !value.is_empty());
        let owner = select.form;
        let name = select.name.clone();

        if let (Some(form), Some(name)) = (owner, name) {
            self.set_field_value(form, &name, value)?;
        }
        Ok(owner)
    }

    pub fn active_tab(&self) -> Option<&str> {
        self.content
            .tabs
            .iter()
            .find(|tab| tab.active)
            .map(|tab| tab.href.as_str())
    }

    /// Activates the tab with `href`; returns false when no such tab exists.
    pub fn select_tab(&mut self, href: &str) -> bool {
        if !self.content.tabs.iter().any(|tab| tab.href == href) {
            return false;
        }
        for tab in &mut self.content.tabs {
            tab.active = tab.href == href;
        }
        true
    }

    pub fn has_anchor(&self, name: &str) -> bool {
        self.content.anchors.iter().any(|anchor| anchor == name)
    }

    pub fn scroll_to_anchor(&mut self, name: &str) -> bool {
        if !self.has_anchor(name) {
            return false;
        }
        self.scrolled_anchor = Some(name.to_owned());
        true
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    pub fn status(&self, control: ControlId) -> Option<&StatusLine> {
        self.status_lines.get(&control)
    }

    pub fn set_status(&mut self, control: ControlId, line: StatusLine) {
        if self.select(control).is_some() {
            self.status_lines.insert(control, line);
        }
    }

    pub fn widget(&self, slot: &str) -> Option<&str> {
        self.widgets.get(slot).map(String::as_str)
    }

    pub fn set_widget(&mut self, slot: &str, html: String) {
        self.widgets.insert(slot.to_owned(), html);
    }

    fn form_mut(&mut self, id: FormId) -> NavResult<&mut Form> {
        self.content
            .forms
            .iter_mut()
            .find(|form| form.id == id)
            .ok_or_else(|| {
                NavError::new(
                    "dom.form_unknown",
                    format!("form {} is not attached", id.raw()),
                )
            })
    }
}

fn field_unknown(form: FormId, name: &str) -> NavError {
    NavError::new(
        "dom.field_unknown",
        format!("form {} has no field `{name}`", form.raw()),
    )
}

#[cfg(test)]
mod tests {
    use super::Document;
    use super::StatusLine;
    use super::StatusTone;

    const PAGE: &str = r##"<html><body data-visible-url="/manage/7/">
        <div id="main-content">
            <ul class="tabs"><li><a href="#one" class="active">One</a></li><li><a href="#two">Two</a></li></ul>
            <a name="two"></a>
            <form data-async-form id="f">
                <input name="prefix" value="!">
                <select name="channel" data-requireperms-send><option value="">-</option><option value="9">#nine</option></select>
            </form>
        </div>
    </body></html>"##;

    #[test]
    fn load_scans_shell_and_content() {
        let document = Document::load(PAGE);
        assert_eq!(document.visible_url(), Some("/manage/7/"));
        assert_eq!(document.forms().len(), 1);
        assert_eq!(document.active_tab(), Some("#one"));
        assert_eq!(document.content_generation(), 1);
    }

    #[test]
    fn replaced_content_detaches_old_handles() {
        let mut document = Document::load(PAGE);
        let old_form = document.forms()[0].id;
        let old_select = document.content().selects[0].id;
        document.set_status(
            old_select,
            StatusLine {
                tone: StatusTone::Checking,
                text: "checking".to_owned(),
            },
        );

        document.install_content(r#"<form data-async-form><input name="prefix"></form>"#);

        assert!(!document.contains_form(old_form));
        assert!(document.status(old_select).is_none());
        let result = document.set_field_value(old_form, "prefix", "?");
        assert!(result.is_err());
        if let Err(error) = result {
            assert_eq!(error.code, "dom.form_unknown");
        }
    }

    #[test]
    fn select_changes_flow_into_the_owning_form() {
        let mut document = Document::load(PAGE);
        let select = document.content().selects[0].id;
        let form = document.forms()[0].id;

        assert_eq!(document.set_select(select, "9"), Ok(Some(form)));
        assert_eq!(
            document.form(form).map(|form| form.snapshot().into_body()),
            Some("prefix=%21&channel=9".to_owned())
        );

        let unknown = document.set_select(select, "404");
        assert!(unknown.is_err());
    }

    #[test]
    fn tabs_and_anchors() {
        let mut document = Document::load(PAGE);
        assert!(document.select_tab("#two"));
        assert_eq!(document.active_tab(), Some("#two"));
        assert!(!document.select_tab("#missing"));
        assert_eq!(document.active_tab(), Some("#two"));

        assert!(document.scroll_to_anchor("two"));
        assert!(!document.scroll_to_anchor("nowhere"));
        assert_eq!(document.scrolled_anchor.as_deref(), Some("two"));
    }
}
