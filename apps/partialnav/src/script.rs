//! Command line and gesture script parsing.

use std::path::PathBuf;

use pn_core::NavError;
use pn_core::NavResult;
use pn_dom::Document;
use pn_dom::FormId;
use pn_session::Gesture;

pub const USAGE: &str = "usage: partialnav [--origin URL] [--guild ID] [--storage DIR] [--analytics] [--ephemeral] [--yes|--no] [START_PATH] [STEP...]

steps:
  link:PATH               click a partial-load link
  anchor:#NAME            click an in-page anchor
  tab:#HREF               activate a tab
  button:LABEL            click a button by its label
  submit:FORM             submit the form with dom id FORM
  field:FORM:NAME=VALUE   edit a form field
  check:FORM:NAME=VALUE   tick a checkbox or radio
  uncheck:FORM:NAME=VALUE untick a checkbox
  edit:FORM:NAME=TEXT     edit a content-editable region
  select:NAME=VALUE       change a select by name
  widget:SLOT=PATH        load a fragment into a widget slot
  sidebar | theme | save | back | forward";

/// One scripted gesture, addressed by markup names rather than handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Link(String),
    Anchor(String),
    Tab(String),
    Button(String),
    Submit(String),
    Field {
        form: String,
        name: String,
        value: String,
    },
    Check {
        form: String,
        name: String,
        value: String,
        checked: bool,
    },
    Edit {
        form: String,
        name: String,
        text: String,
    },
    Select {
        name: String,
        value: String,
    },
    Widget {
        slot: String,
        path: String,
    },
    Sidebar,
    Theme,
    Save,
    Back,
    Forward,
}

impl Step {
    pub fn parse(input: &str) -> NavResult<Self> {
        let (verb, rest) = input.split_once(':').unwrap_or((input, ""));
        let step = match (verb, rest) {
            ("sidebar", "") => Self::Sidebar,
            ("theme", "") => Self::Theme,
            ("save", "") => Self::Save,
            ("back", "") => Self::Back,
            ("forward", "") => Self::Forward,
            ("link", path) if !path.is_empty() => Self::Link(path.to_owned()),
            ("anchor", name) if !name.is_empty() => Self::Anchor(name.to_owned()),
            ("tab", href) if !href.is_empty() => Self::Tab(href.to_owned()),
            ("button", label) if !label.is_empty() => Self::Button(label.to_owned()),
            ("submit", form) if !form.is_empty() => Self::Submit(form.to_owned()),
            ("field", rest) => {
                let (form, name, value) = form_assignment(input, rest)?;
                Self::Field { form, name, value }
            }
            ("check" | "uncheck", rest) => {
                let (form, name, value) = form_assignment(input, rest)?;
                Self::Check {
                    form,
                    name,
                    value,
                    checked: verb == "check",
                }
            }
            ("edit", rest) => {
                let (form, name, text) = form_assignment(input, rest)?;
                Self::Edit { form, name, text }
            }
            ("select", rest) => {
                let (name, value) = assignment(input, rest)?;
                Self::Select { name, value }
            }
            ("widget", rest) => {
                let (slot, path) = assignment(input, rest)?;
                Self::Widget { slot, path }
            }
            _ => return Err(invalid_step(input)),
        };
        Ok(step)
    }

    /// Looks up the handles the step refers to in the current document.
    pub fn resolve(&self, doc: &Document) -> NavResult<Gesture> {
        let gesture = match self {
            Self::Link(path) => Gesture::ClickLink(path.clone()),
            Self::Anchor(name) => Gesture::ClickAnchor(name.clone()),
            Self::Tab(href) => Gesture::SelectTab(href.clone()),
            Self::Button(label) => {
                let button = doc
                    .content()
                    .buttons
                    .iter()
                    .find(|button| button.label == *label)
                    .ok_or_else(|| {
                        NavError::new("cli.button_unknown", format!("no button labelled `{label}`"))
                    })?;
                Gesture::ClickButton(button.id)
            }
            Self::Submit(form) => Gesture::SubmitForm(form_handle(doc, form)?),
            Self::Field { form, name, value } => Gesture::ChangeField {
                form: form_handle(doc, form)?,
                name: name.clone(),
                value: value.clone(),
            },
            Self::Check {
                form,
                name,
                value,
                checked,
            } => Gesture::ChangeChecked {
                form: form_handle(doc, form)?,
                name: name.clone(),
                value: value.clone(),
                checked: *checked,
            },
            Self::Edit { form, name, text } => Gesture::ChangeEditable {
                form: form_handle(doc, form)?,
                name: name.clone(),
                text: text.clone(),
            },
            Self::Select { name, value } => {
                let select = doc
                    .content()
                    .selects
                    .iter()
                    .find(|select| select.name.as_deref() == Some(name.as_str()))
                    .ok_or_else(|| {
                        NavError::new("cli.select_unknown", format!("no select named `{name}`"))
                    })?;
                Gesture::ChangeSelect {
                    control: select.id,
                    value: value.clone(),
                }
            }
            Self::Widget { slot, path } => Gesture::LoadWidget {
                slot: slot.clone(),
                path: path.clone(),
            },
            Self::Sidebar => Gesture::ToggleSidebar,
            Self::Theme => Gesture::ToggleTheme,
            Self::Save => Gesture::SaveUnsaved,
            Self::Back => Gesture::Back,
            Self::Forward => Gesture::Forward,
        };
        Ok(gesture)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub origin: Option<String>,
    pub guild: Option<String>,
    pub storage: Option<PathBuf>,
    pub analytics: bool,
    pub ephemeral: bool,
    /// Fixed answer for confirmations; `None` asks on stdin.
    pub assume: Option<bool>,
    pub start: String,
    pub steps: Vec<(String, Step)>,
    pub help: bool,
}

impl Default for Invocation {
    fn default() -> Self {
        Self {
            origin: None,
            guild: None,
            storage: None,
            analytics: false,
            ephemeral: false,
            assume: None,
            start: "/".to_owned(),
            steps: Vec::new(),
            help: false,
        }
    }
}

pub fn parse_args(args: impl IntoIterator<Item = String>) -> NavResult<Invocation> {
    let mut invocation = Invocation::default();
    let mut start = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--origin" => invocation.origin = Some(value_after(&mut args, "--origin")?),
            "--guild" => invocation.guild = Some(value_after(&mut args, "--guild")?),
            "--storage" => {
                invocation.storage = Some(PathBuf::from(value_after(&mut args, "--storage")?));
            }
            "--analytics" => invocation.analytics = true,
            "--ephemeral" => invocation.ephemeral = true,
            "--yes" => invocation.assume = Some(true),
            "--no" => invocation.assume = Some(false),
            "-h" | "--help" => invocation.help = true,
            flag if flag.starts_with("--") => {
                return Err(NavError::new(
                    "cli.flag_unknown",
                    format!("unknown flag `{flag}`"),
                ));
            }
            _ if start.is_none() => start = Some(arg),
            _ => {
                let step = Step::parse(&arg)?;
                invocation.steps.push((arg, step));
            }
        }
    }

    if let Some(start) = start {
        invocation.start = start;
    }
    Ok(invocation)
}

fn value_after(args: &mut impl Iterator<Item = String>, flag: &str) -> NavResult<String> {
    args.next()
        .ok_or_else(|| NavError::new("cli.value_missing", format!("missing value after {flag}")))
}

fn form_handle(doc: &Document, dom_id: &str) -> NavResult<FormId> {
    doc.form_by_dom_id(dom_id)
        .map(|form| form.id)
        .ok_or_else(|| NavError::new("cli.form_unknown", format!("no form with id `{dom_id}`")))
}

fn assignment(input: &str, rest: &str) -> NavResult<(String, String)> {
    let (name, value) = rest.split_once('=').ok_or_else(|| invalid_step(input))?;
    if name.is_empty() {
        return Err(invalid_step(input));
    }
    Ok((name.to_owned(), value.to_owned()))
}

fn form_assignment(input: &str, rest: &str) -> NavResult<(String, String, String)> {
    let (form, rest) = rest.split_once(':').ok_or_else(|| invalid_step(input))?;
    if form.is_empty() {
        return Err(invalid_step(input));
    }
    let (name, value) = assignment(input, rest)?;
    Ok((form.to_owned(), name, value))
}

fn invalid_step(input: &str) -> NavError {
    NavError::new("cli.step_invalid", format!("cannot parse step `{input}`"))
}
