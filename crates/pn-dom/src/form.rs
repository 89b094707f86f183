//! Forms, their controls, and snapshot serialization.

use url::form_urlencoded;

/// Handle of a form inside the current content region.
///
/// Handles are minted per installed fragment and never reused, so a handle that
/// outlives its fragment is detectably detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormId(pub(crate) u64);

/// Handle of a non-form control (button, select, status line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(pub(crate) u64);

impl FormId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl ControlId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Monotonic handle source owned by the document.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn form(&mut self) -> FormId {
        self.next += 1;
        FormId(self.next)
    }

    pub(crate) fn control(&mut self) -> ControlId {
        self.next += 1;
        ControlId(self.next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Text-like inputs, hidden inputs, textareas and selects.
    Value,
    /// Only submitted when checked.
    Checkbox { checked: bool },
    /// Only submitted when checked; checking one unchecks its same-named siblings.
    Radio { checked: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
    pub disabled: bool,
}

impl Field {
    fn is_successful(&self) -> bool {
        if self.disabled || self.name.is_empty() {
            return false;
        }

        match self.kind {
            FieldKind::Value => true,
            FieldKind::Checkbox { checked } | FieldKind::Radio { checked } => checked,
        }
    }
}

/// `[data-content-editable-form]` region serialized as an extra pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableRegion {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub id: FormId,
    pub dom_id: Option<String>,
    pub action: Option<String>,
    pub is_async: bool,
    pub alerts_only: bool,
    pub fields: Vec<Field>,
    pub editable_regions: Vec<EditableRegion>,
}

impl Form {
    /// Serializes the successful controls followed by the editable regions.
    pub fn snapshot(&self) -> FormSnapshot {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for field in self.fields.iter().filter(|field| field.is_successful()) {
            serializer.append_pair(&field.name, &field.value);
        }
        for region in &self.editable_regions {
            serializer.append_pair(&region.name, &region.text);
        }
        FormSnapshot(serializer.finish())
    }

    pub(crate) fn set_value(&mut self, name: &str, value: &str) -> bool {
        let Some(field) = self
            .fields
            .iter_mut()
            .find(|field| field.name == name && field.kind == FieldKind::Value)
        else {
            return false;
        };
        field.value = value.to_owned();
        true
    }

    /// Checkables sharing a name are told apart by their value.
    pub(crate) fn set_checked(&mut self, name: &str, value: &str, checked: bool) -> bool {
        let Some(index) = self.fields.iter().position(|field| {
            field.name == name
                && field.value == value
                && matches!(field.kind, FieldKind::Checkbox { .. } | FieldKind::Radio { .. })
        }) else {
            return false;
        };

        let is_radio = matches!(self.fields[index].kind, FieldKind::Radio { .. });
        if is_radio && checked {
            for sibling in self.fields.iter_mut().filter(|field| field.name == name) {
                if let FieldKind::Radio { checked } = &mut sibling.kind {
                    *checked = false;
                }
            }
        }

        match &mut self.fields[index].kind {
            FieldKind::Checkbox { checked: state } | FieldKind::Radio { checked: state } => {
                *state = checked;
            }
            FieldKind::Value => {}
        }
        true
    }

    pub(crate) fn set_editable(&mut self, name: &str, text: &str) -> bool {
        let Some(region) = self
            .editable_regions
            .iter_mut()
            .find(|region| region.name == name)
        else {
            return false;
        };
        region.text = text.to_owned();
        true
    }
}

/// Serialized form state compared by string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormSnapshot(String);

impl FormSnapshot {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_body(self) -> String {
        self.0
    }
}
