//! Unsaved-changes tracking across every form on the page.

use std::collections::HashMap;

use pn_dom::Document;
use pn_dom::FormId;
use pn_dom::FormSnapshot;
use pn_dom::UnsavedPopup;
use tracing::debug;
use tracing::info;

pub const SINGLE_FORM_PROMPT: &str = "You have unsaved changes, would you like to save them?";
pub const MULTI_FORM_PROMPT: &str = "You have unsaved changes on multiple forms, save them all?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Regular async-form submit of the only dirty form.
    Direct,
    /// One step of a bulk save: alerts only, scroll kept, next step on completion.
    Bulk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub form: FormId,
    pub body: FormSnapshot,
    pub mode: SubmitMode,
}

#[derive(Debug, Default)]
pub struct UnsavedChangesTracker {
    baselines: HashMap<FormId, FormSnapshot>,
    /// Submitted snapshots awaiting the server's answer.
    in_flight: HashMap<FormId, FormSnapshot>,
    /// Rejected during a bulk save; back on the stack once it ends.
    rejected: Vec<FormId>,
    stack: Vec<FormId>,
    saving: bool,
}

impl UnsavedChangesTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dirty forms, oldest first.
    pub fn dirty_forms(&self) -> &[FormId] {
        &self.stack
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn is_registered(&self, form: FormId) -> bool {
        self.baselines.contains_key(&form)
    }

    /// Records a baseline for every form not tracked yet.
    pub fn register_scope(&mut self, doc: &Document) {
        for form in doc.forms() {
            self.baselines
                .entry(form.id)
                .or_insert_with(|| form.snapshot());
        }
    }

    /// Re-serializes `form` and returns whether it now differs from its baseline.
    pub fn on_form_changed(&mut self, doc: &mut Document, form: FormId) -> bool {
        let dirty = self.check(doc, form);
        self.publish(doc);
        dirty
    }

    /// Drops forms that left the document; during a bulk save re-checks the rest.
    pub fn on_document_mutated(&mut self, doc: &mut Document) {
        let detached: Vec<FormId> = self
            .baselines
            .keys()
            .copied()
            .filter(|form| !doc.contains_form(*form))
            .collect();
        for form in detached {
            self.forget(form);
        }

        if self.saving {
            let registered: Vec<FormId> = self.baselines.keys().copied().collect();
            for form in registered {
                self.check(doc, form);
            }
        }
        self.publish(doc);
    }

    pub fn unregister(&mut self, doc: &mut Document, form: FormId) {
        self.forget(form);
        self.publish(doc);
    }

    /// Starts saving the dirty forms.
    pub fn begin_save(&mut self, doc: &mut Document) -> Option<FormSubmission> {
        if self.saving {
            return None;
        }

        if let &[only] = self.stack.as_slice() {
            self.stack.clear();
            self.publish(doc);
            return self.submission(doc, only, SubmitMode::Direct);
        }

        if self.stack.is_empty() {
            return None;
        }

        info!(target: "partialnav::forms", forms = self.stack.len(), "bulk save started");
        self.saving = true;
        self.continue_save(doc)
    }

    /// Next bulk-save step, or `None` once the stack is drained.
    pub fn continue_save(&mut self, doc: &mut Document) -> Option<FormSubmission> {
        if !self.saving {
            return None;
        }

        while let Some(form) = self.stack.pop() {
            if let Some(submission) = self.submission(doc, form, SubmitMode::Bulk) {
                self.publish(doc);
                return Some(submission);
            }
        }

        info!(target: "partialnav::forms", "bulk save finished");
        self.saving = false;
        for form in std::mem::take(&mut self.rejected) {
            self.check(doc, form);
        }
        self.publish(doc);
        None
    }

    /// Settles a submission. An accepted snapshot becomes the baseline; a rejected one
    /// leaves the old baseline, so the form is dirty again.
    pub fn finish_save(&mut self, doc: &mut Document, form: FormId, accepted: bool) {
        let Some(submitted) = self.in_flight.remove(&form) else {
            return;
        };
        if !self.baselines.contains_key(&form) {
            return;
        }

        if accepted {
            self.baselines.insert(form, submitted);
        } else {
            info!(target: "partialnav::forms", form = form.raw(), "save rejected");
        }
        if self.saving && !accepted {
            self.rejected.push(form);
        } else {
            self.check(doc, form);
        }
        self.publish(doc);
    }

    fn submission(&mut self, doc: &Document, form: FormId, mode: SubmitMode) -> Option<FormSubmission> {
        let body = doc.form(form)?.snapshot();
        self.in_flight.insert(form, body.clone());
        debug!(target: "partialnav::forms", form = form.raw(), ?mode, "submitting form");
        Some(FormSubmission { form, body, mode })
    }

    fn check(&mut self, doc: &Document, form: FormId) -> bool {
        let Some(current) = doc.form(form).map(|form| form.snapshot()) else {
            self.forget(form);
            return false;
        };
        if self.saving && self.rejected.contains(&form) {
            return true;
        }
        let baseline: &FormSnapshot = match self.in_flight.get(&form) {
            Some(submitted) => submitted,
            None => self
                .baselines
                .entry(form)
                .or_insert_with(|| current.clone()),
        };

        let dirty = *baseline != current;
        if dirty {
            if !self.stack.contains(&form) {
                self.stack.push(form);
            }
        } else {
            self.stack.retain(|tracked| *tracked != form);
        }
        dirty
    }

    fn forget(&mut self, form: FormId) {
        self.baselines.remove(&form);
        self.in_flight.remove(&form);
        self.rejected.retain(|tracked| *tracked != form);
        self.stack.retain(|tracked| *tracked != form);
    }

    fn publish(&self, doc: &mut Document) {
        doc.unsaved_popup = match self.stack.len() {
            0 => UnsavedPopup::default(),
            count => UnsavedPopup {
                visible: true,
                message: if count == 1 {
                    SINGLE_FORM_PROMPT
                } else {
                    MULTI_FORM_PROMPT
                }
                .to_owned(),
                save_button_visible: !self.saving,
            },
        };
    }
}
