//! Extraction of the markup hooks the dispatcher keys on.

use crate::form::ControlId;
use crate::form::EditableRegion;
use crate::form::Field;
use crate::form::FieldKind;
use crate::form::Form;
use crate::form::FormId;
use crate::form::HandleAllocator;
use crate::html;
use crate::html::Element;
use crate::html::Node;

/// Which permission set a channel select must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeRequirement {
    /// `data-requireperms-send`
    Send,
    /// `data-requireperms-embed`
    Embed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectControl {
    pub id: ControlId,
    pub form: Option<FormId>,
    pub name: Option<String>,
    pub options: Vec<String>,
    pub value: Option<String>,
    pub probe: Option<ProbeRequirement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Submit,
    Button,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: ControlId,
    /// Form the button sits inside of, if any.
    pub form: Option<FormId>,
    /// `form="…"` attribute naming a form by DOM id.
    pub form_attr: Option<String>,
    pub kind: ButtonKind,
    pub label: String,
    pub title: Option<String>,
    pub formaction: Option<String>,
    pub classes: Vec<String>,
    pub noconfirm: bool,
    pub open_confirm: bool,
    pub alerts_only: bool,
}

impl Button {
    pub fn is_destructive(&self) -> bool {
        self.classes
            .iter()
            .any(|class| class == "btn-danger" || class == "delete-button")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub href: String,
    pub active: bool,
}

/// Scanned content region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub html: String,
    pub forms: Vec<Form>,
    pub selects: Vec<SelectControl>,
    pub buttons: Vec<Button>,
    pub tabs: Vec<Tab>,
    pub partial_links: Vec<String>,
    pub anchors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuGroup {
    pub expanded: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub href: String,
    pub group: Option<usize>,
    pub active: bool,
    /// Carries `data-partial-load`.
    pub partial: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    pub groups: Vec<MenuGroup>,
    pub entries: Vec<MenuEntry>,
}

/// Full-page scan result: the shell around the content region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageShell {
    pub visible_url: Option<String>,
    pub menu: Menu,
    pub content_html: String,
}

pub fn scan_page(source: &str) -> PageShell {
    let root = html::parse(source);
    let visible_url = root
        .find_tag("body")
        .and_then(|body| body.attr("data-visible-url"))
        .filter(|url| !url.is_empty())
        .map(str::to_owned);

    let mut menu = Menu::default();
    if let Some(menu_root) = root.find_by_id("menu") {
        collect_menu(menu_root, None, &mut menu);
    }

    let content_html = root
        .find_by_id("main-content")
        .map(html::inner_html)
        .unwrap_or_else(|| source.to_owned());

    PageShell {
        visible_url,
        menu,
        content_html,
    }
}

fn collect_menu(element: &Element, group: Option<usize>, menu: &mut Menu) {
    for child in &element.children {
        let Node::Element(child) = child else {
            continue;
        };

        let mut child_group = group;
        if child.has_class("nav-parent") {
            menu.groups.push(MenuGroup {
                expanded: false,
                active: false,
            });
            child_group = Some(menu.groups.len() - 1);
        }

        if child.tag == "a" && child.has_class("nav-link") {
            if let Some(href) = child.attr("href") {
                menu.entries.push(MenuEntry {
                    href: href.to_owned(),
                    group: child_group,
                    active: false,
                    partial: child.has_attr("data-partial-load"),
                });
            }
        }

        collect_menu(child, child_group, menu);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ScanContext {
    form: Option<usize>,
    in_tabs: bool,
}

pub(crate) fn scan_fragment(source: &str, handles: &mut HandleAllocator) -> Fragment {
    let root = html::parse(source);
    let mut fragment = Fragment {
        html: source.to_owned(),
        ..Fragment::default()
    };
    walk(&root, ScanContext::default(), handles, &mut fragment);
    fragment
}

fn walk(
    element: &Element,
    ctx: ScanContext,
    handles: &mut HandleAllocator,
    out: &mut Fragment,
) {
    for child in &element.children {
        let Node::Element(child) = child else {
            continue;
        };

        let mut child_ctx = ctx;
        if child.has_class("tabs") {
            child_ctx.in_tabs = true;
        }

        if let Some(name) = child.attr("data-content-editable-form") {
            if let Some(form) = ctx.form.and_then(|index| out.forms.get_mut(index)) {
                form.editable_regions.push(EditableRegion {
                    name: name.to_owned(),
                    text: child.text_content(),
                });
            }
        }

        match child.tag.as_str() {
            "form" => {
                out.forms.push(Form {
                    id: handles.form(),
                    dom_id: child.attr("id").map(str::to_owned),
                    action: child
                        .attr("action")
                        .filter(|action| !action.is_empty())
                        .map(str::to_owned),
                    is_async: child.has_attr("data-async-form"),
                    alerts_only: child.has_attr("data-async-form-alertsonly"),
                    fields: Vec::new(),
                    editable_regions: Vec::new(),
                });
                child_ctx.form = Some(out.forms.len() - 1);
            }
            "input" => {
                scan_input(child, ctx, handles, out);
                continue;
            }
            "textarea" => {
                let value = html::decode_entities(&child.text_content());
                push_field(child, value, FieldKind::Value, ctx, out);
                continue;
            }
            "select" => {
                scan_select(child, ctx, handles, out);
                continue;
            }
            "button" => {
                let kind = match child.attr("type").map(str::to_ascii_lowercase).as_deref() {
                    Some("button") => ButtonKind::Button,
                    Some("reset") => ButtonKind::Reset,
                    _ => ButtonKind::Submit,
                };
                push_button(child, kind, child.text_content().trim().to_owned(), ctx, handles, out);
            }
            "a" => {
                if let Some(href) = child.attr("href") {
                    if child.has_attr("data-partial-load") {
                        out.partial_links.push(href.to_owned());
                    }
                    if ctx.in_tabs {
                        out.tabs.push(Tab {
                            href: href.to_owned(),
                            active: child.has_class("active"),
                        });
                    }
                }
                if let Some(name) = child.attr("name") {
                    out.anchors.push(name.to_owned());
                }
            }
            _ => {}
        }

        walk(child, child_ctx, handles, out);
    }
}

fn scan_input(
    element: &Element,
    ctx: ScanContext,
    handles: &mut HandleAllocator,
    out: &mut Fragment,
) {
    let input_type = element
        .attr("type")
        .unwrap_or("text")
        .to_ascii_lowercase();
    let value = element.attr("value").unwrap_or_default().to_owned();

    let kind = match input_type.as_str() {
        "submit" | "image" => {
            push_button(element, ButtonKind::Submit, value, ctx, handles, out);
            return;
        }
        "button" => {
            push_button(element, ButtonKind::Button, value, ctx, handles, out);
            return;
        }
        "reset" => {
            push_button(element, ButtonKind::Reset, value, ctx, handles, out);
            return;
        }
        "file" => return,
        "checkbox" => FieldKind::Checkbox {
            checked: element.has_attr("checked"),
        },
        "radio" => FieldKind::Radio {
            checked: element.has_attr("checked"),
        },
        _ => FieldKind::Value,
    };

    let value = match kind {
        FieldKind::Value => value,
        _ if element.has_attr("value") => value,
        _ => "on".to_owned(),
    };
    push_field(element, value, kind, ctx, out);
}

fn scan_select(
    element: &Element,
    ctx: ScanContext,
    handles: &mut HandleAllocator,
    out: &mut Fragment,
) {
    let mut options = Vec::new();
    let mut selected = None;
    collect_options(element, &mut options, &mut selected);
    let value = selected.or_else(|| options.first().cloned());

    let probe = if element.has_attr("data-requireperms-embed") {
        Some(ProbeRequirement::Embed)
    } else if element.has_attr("data-requireperms-send") {
        Some(ProbeRequirement::Send)
    } else {
        None
    };

    if let Some(value) = value.clone() {
        push_field(element, value, FieldKind::Value, ctx, out);
    }

    let form = ctx
        .form
        .and_then(|index| out.forms.get(index))
        .map(|form| form.id);
    out.selects.push(SelectControl {
        id: handles.control(),
        form,
        name: element.attr("name").map(str::to_owned),
        options,
        value: value.filter(|value| !value.is_empty()),
        probe,
    });
}

fn collect_options(element: &Element, options: &mut Vec<String>, selected: &mut Option<String>) {
    for child in &element.children {
        let Node::Element(child) = child else {
            continue;
        };

        if child.tag == "option" {
            let value = child
                .attr("value")
                .map(str::to_owned)
                .unwrap_or_else(|| child.text_content().trim().to_owned());
            if child.has_attr("selected") && selected.is_none() {
                *selected = Some(value.clone());
            }
            options.push(value);
            continue;
        }

        collect_options(child, options, selected);
    }
}

fn push_field(element: &Element, value: String, kind: FieldKind, ctx: ScanContext, out: &mut Fragment) {
    let Some(form) = ctx.form.and_then(|index| out.forms.get_mut(index)) else {
        return;
    };
    let Some(name) = element.attr("name") else {
        return;
    };

    form.fields.push(Field {
        name: name.to_owned(),
        value,
        kind,
        disabled: element.has_attr("disabled"),
    });
}

fn push_button(
    element: &Element,
    kind: ButtonKind,
    label: String,
    ctx: ScanContext,
    handles: &mut HandleAllocator,
    out: &mut Fragment,
) {
    let form = ctx
        .form
        .and_then(|index| out.forms.get(index))
        .map(|form| form.id);
    out.buttons.push(Button {
        id: handles.control(),
        form,
        form_attr: element.attr("form").map(str::to_owned),
        kind,
        label,
        title: element.attr("title").map(str::to_owned),
        formaction: element
            .attr("formaction")
            .filter(|action| !action.is_empty())
            .map(str::to_owned),
        classes: element.classes(),
        noconfirm: element.has_attr("noconfirm"),
        open_confirm: element.has_attr("data-open-confirm"),
        alerts_only: element.has_attr("data-async-form-alertsonly"),
    });
}
