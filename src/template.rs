//! Form templates and the data submitted against them
use super::approver::ApprovalConfig;
use super::error::ConfigurationError;
use super::types::TimeStamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    #[n(0)]
    Text(#[n(0)] String),
    #[n(1)]
    Number(#[n(0)] i64),
    #[n(2)]
    Flag(#[n(0)] bool),
    #[n(3)]
    Date(#[n(0)] TimeStamp),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Checkbox,
    Select { options: Vec<String> },
    Signature,
}

/// A template is a tree: inputs are leaves, sections group them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum FormField {
    Input {
        key: String,
        label: String,
        kind: FieldKind,
        #[serde(default)]
        required: bool,
    },
    Section {
        title: String,
        children: Vec<FormField>,
    },
}

impl FormField {
    pub fn input(key: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        FormField::Input {
            key: key.into(),
            label: label.into(),
            kind,
            required: false,
        }
    }
    pub fn required(key: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        FormField::Input {
            key: key.into(),
            label: label.into(),
            kind,
            required: true,
        }
    }
    pub fn section(title: impl Into<String>, children: Vec<FormField>) -> Self {
        FormField::Section {
            title: title.into(),
            children,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("`{0}` is required")]
    Missing(String),
    #[error("`{key}` expects a {expected} value")]
    WrongType { key: String, expected: &'static str },
    #[error("`{key}` does not offer option `{value}`")]
    UnknownOption { key: String, value: String },
    #[error("`{0}` is not a field of this form")]
    UnknownField(String),
    #[error("`{0}` must be signed")]
    Unsigned(String),
}

impl FieldError {
    pub fn key(&self) -> &str {
        match self {
            FieldError::Missing(key)
            | FieldError::UnknownField(key)
            | FieldError::Unsigned(key)
            | FieldError::WrongType { key, .. }
            | FieldError::UnknownOption { key, .. } => key,
        }
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FormData {
    #[n(0)]
    fields: BTreeMap<String, FieldValue>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplate {
    pub id: String,
    pub name: String,
    pub fields: Vec<FormField>,
    #[serde(rename = "approvers")]
    pub approval: ApprovalConfig,
}

impl FormTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, approval: ApprovalConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: vec![],
            approval,
        }
    }
    pub fn with_field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    /// Every leaf input, depth first.
    pub fn inputs(&self) -> Vec<(&str, &FieldKind, bool)> {
        fn walk<'a>(fields: &'a [FormField], out: &mut Vec<(&'a str, &'a FieldKind, bool)>) {
            for field in fields {
                match field {
                    FormField::Input {
                        key, kind, required, ..
                    } => out.push((key.as_str(), kind, *required)),
                    FormField::Section { children, .. } => walk(children, out),
                }
            }
        }

        let mut out = vec![];
        walk(&self.fields, &mut out);
        out
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.approval.validate()?;

        let mut keys = HashSet::new();
        for (key, _, _) in self.inputs() {
            if !keys.insert(key) {
                return Err(ConfigurationError::Malformed(format!(
                    "field key `{key}` is used more than once"
                )));
            }
        }
        Ok(())
    }

    /// Collects every problem so each can be shown next to its field.
    pub fn check(&self, data: &FormData) -> Result<(), Vec<FieldError>> {
        let inputs = self.inputs();
        let mut errors = vec![];

        for (key, kind, required) in &inputs {
            let Some(value) = data.get(key) else {
                if *required {
                    errors.push(FieldError::Missing(key.to_string()));
                }
                continue;
            };
            if let Err(e) = check_value(key, kind, *required, value) {
                errors.push(e);
            }
        }

        for key in data.keys() {
            if !inputs.iter().any(|(known, _, _)| *known == key) {
                errors.push(FieldError::UnknownField(key.to_string()));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn check_value(
    key: &str,
    kind: &FieldKind,
    required: bool,
    value: &FieldValue,
) -> Result<(), FieldError> {
    let wrong = |expected| FieldError::WrongType {
        key: key.to_string(),
        expected,
    };

    match (kind, value) {
        (FieldKind::Text, FieldValue::Text(text)) if required && text.trim().is_empty() => {
            Err(FieldError::Missing(key.to_string()))
        }
        (FieldKind::Text, FieldValue::Text(_)) => Ok(()),
        (FieldKind::Text, _) => Err(wrong("text")),
        (FieldKind::Number, FieldValue::Number(_)) => Ok(()),
        (FieldKind::Number, _) => Err(wrong("number")),
        (FieldKind::Date, FieldValue::Date(_)) => Ok(()),
        (FieldKind::Date, _) => Err(wrong("date")),
        (FieldKind::Checkbox, FieldValue::Flag(_)) => Ok(()),
        (FieldKind::Checkbox, _) => Err(wrong("checkbox")),
        (FieldKind::Select { options }, FieldValue::Text(choice)) => {
            if options.iter().any(|option| option == choice) {
                Ok(())
            } else {
                Err(FieldError::UnknownOption {
                    key: key.to_string(),
                    value: choice.clone(),
                })
            }
        }
        (FieldKind::Select { .. }, _) => Err(wrong("text")),
        (FieldKind::Signature, FieldValue::Flag(false)) if required => {
            Err(FieldError::Unsigned(key.to_string()))
        }
        (FieldKind::Signature, FieldValue::Flag(_)) => Ok(()),
        (FieldKind::Signature, _) => Err(wrong("signature")),
    }
}
