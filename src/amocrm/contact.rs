use crate::error::CrmError;
use crate::types::document::{lookup, lookup_str};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Custom contact attributes the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactField {
    Email,
    Phone,
    Position,
    Skype,
    Facebook,
    FacebookName,
    Instagram,
    Vk,
    Experience,
}

impl ContactField {
    pub const ALL: [ContactField; 9] = [
        ContactField::Email,
        ContactField::Phone,
        ContactField::Position,
        ContactField::Skype,
        ContactField::Facebook,
        ContactField::FacebookName,
        ContactField::Instagram,
        ContactField::Vk,
        ContactField::Experience,
    ];

    /// Resolve a provider custom field by its `code`, then by its `name`.
    pub fn from_provider(code: Option<&str>, name: Option<&str>) -> Option<Self> {
        let find = |key: &str| {
            PROVIDER_FIELDS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, f)| *f)
        };
        code.and_then(find).or_else(|| name.and_then(find))
    }

    pub fn output_key(self) -> &'static str {
        match self {
            ContactField::Email => "email",
            ContactField::Phone => "phone",
            ContactField::Position => "position",
            ContactField::Skype => "skype",
            ContactField::Facebook => "facebook",
            ContactField::FacebookName => "facebookName",
            ContactField::Instagram => "instagram",
            ContactField::Vk => "vk",
            ContactField::Experience => "experience",
        }
    }
}

/// Provider field code or name → normalized field. Codes are amoCRM's
/// predefined ones; the rest are account-specific field names.
const PROVIDER_FIELDS: &[(&str, ContactField)] = &[
    ("EMAIL", ContactField::Email),
    ("PHONE", ContactField::Phone),
    ("POSITION", ContactField::Position),
    ("IM", ContactField::Skype),
    ("Facebook", ContactField::Facebook),
    ("Имя в Facebook", ContactField::FacebookName),
    ("Instagram", ContactField::Instagram),
    ("ВКонтакте", ContactField::Vk),
    ("Опыт программирования", ContactField::Experience),
];

/// Checked once at startup: keys are unique and every field is reachable.
pub fn validate_field_mapping() -> Result<(), CrmError> {
    validate_mapping(PROVIDER_FIELDS)
}

fn validate_mapping(table: &[(&str, ContactField)]) -> Result<(), CrmError> {
    let mut seen = HashSet::new();
    for (key, _) in table {
        if !seen.insert(*key) {
            return Err(CrmError::FieldMapping(format!("duplicate provider key `{key}`")));
        }
    }
    for field in ContactField::ALL {
        if !table.iter().any(|(_, f)| *f == field) {
            return Err(CrmError::FieldMapping(format!(
                "`{}` has no provider key",
                field.output_key()
            )));
        }
    }
    Ok(())
}

/// Value of a custom field: one entry, or all of them when several exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

impl FieldValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            FieldValue::Single(v) => Some(v),
            FieldValue::Many(vs) => vs.first().map(String::as_str),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Single(v) => f.write_str(v),
            FieldValue::Many(vs) => f.write_str(&vs.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skype: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_name: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vk: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_name: Option<String>,
}

impl ContactInfo {
    /// Build from one entry of `_embedded.items` of the contacts endpoint.
    pub fn from_contact(contact: &Value) -> Self {
        let mut info = ContactInfo {
            name: lookup_str(contact, "name"),
            first_name: lookup_str(contact, "first_name"),
            last_name: lookup_str(contact, "last_name"),
            company: lookup_str(contact, "company.name"),
            ..ContactInfo::default()
        };

        let fields = lookup(contact, "custom_fields")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for field in fields {
            let code = field.get("code").and_then(Value::as_str);
            let name = field.get("name").and_then(Value::as_str);
            let Some(kind) = ContactField::from_provider(code, name) else {
                continue;
            };
            if let Some(value) = field_value(field) {
                *info.slot(kind) = Some(value);
            }
        }
        info
    }

    pub fn field(&self, kind: ContactField) -> Option<&FieldValue> {
        match kind {
            ContactField::Email => self.email.as_ref(),
            ContactField::Phone => self.phone.as_ref(),
            ContactField::Position => self.position.as_ref(),
            ContactField::Skype => self.skype.as_ref(),
            ContactField::Facebook => self.facebook.as_ref(),
            ContactField::FacebookName => self.facebook_name.as_ref(),
            ContactField::Instagram => self.instagram.as_ref(),
            ContactField::Vk => self.vk.as_ref(),
            ContactField::Experience => self.experience.as_ref(),
        }
    }

    fn slot(&mut self, kind: ContactField) -> &mut Option<FieldValue> {
        match kind {
            ContactField::Email => &mut self.email,
            ContactField::Phone => &mut self.phone,
            ContactField::Position => &mut self.position,
            ContactField::Skype => &mut self.skype,
            ContactField::Facebook => &mut self.facebook,
            ContactField::FacebookName => &mut self.facebook_name,
            ContactField::Instagram => &mut self.instagram,
            ContactField::Vk => &mut self.vk,
            ContactField::Experience => &mut self.experience,
        }
    }
}

fn field_value(field: &Value) -> Option<FieldValue> {
    let mut values: Vec<String> = field
        .get("values")?
        .as_array()?
        .iter()
        .filter_map(|v| lookup_str(v, "value"))
        .collect();
    match values.len() {
        0 => None,
        1 => values.pop().map(FieldValue::Single),
        _ => Some(FieldValue::Many(values)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapping_table_is_valid() {
        validate_field_mapping().unwrap();
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let table = [("EMAIL", ContactField::Email), ("EMAIL", ContactField::Phone)];
        assert!(matches!(
            validate_mapping(&table),
            Err(CrmError::FieldMapping(_))
        ));
    }

    #[test]
    fn unreachable_fields_are_rejected() {
        let table = [("EMAIL", ContactField::Email)];
        assert!(validate_mapping(&table).is_err());
    }

    #[test]
    fn code_wins_over_name() {
        assert_eq!(
            ContactField::from_provider(Some("PHONE"), Some("Instagram")),
            Some(ContactField::Phone)
        );
        assert_eq!(
            ContactField::from_provider(Some("CUSTOM_1"), Some("ВКонтакте")),
            Some(ContactField::Vk)
        );
        assert_eq!(ContactField::from_provider(None, Some("Unknown")), None);
    }

    #[test]
    fn builds_contact_info() {
        let contact = json!({
            "id": 46925315,
            "name": "Тест Тестов Тестович",
            "first_name": "",
            "company": {"id": 1, "name": "ACME"},
            "custom_fields": [
                {"id": 1, "code": "PHONE", "name": "Телефон", "values": [{"value": "+72323324234", "enum": "WORK"}]},
                {"id": 2, "code": "EMAIL", "name": "Email", "values": [
                    {"value": "a@example.com"}, {"value": "b@example.com"}
                ]},
                {"id": 3, "name": "Опыт программирования", "values": [{"value": 3}]},
                {"id": 4, "name": "Ignored", "values": [{"value": "x"}]},
                {"id": 5, "code": "IM", "values": []}
            ]
        });
        let info = ContactInfo::from_contact(&contact);
        assert_eq!(info.name.as_deref(), Some("Тест Тестов Тестович"));
        assert_eq!(info.company.as_deref(), Some("ACME"));
        assert_eq!(
            info.phone,
            Some(FieldValue::Single("+72323324234".to_string()))
        );
        assert_eq!(
            info.email,
            Some(FieldValue::Many(vec![
                "a@example.com".to_string(),
                "b@example.com".to_string()
            ]))
        );
        assert_eq!(info.field(ContactField::Experience).and_then(FieldValue::first), Some("3"));
        assert!(info.skype.is_none());
    }

    #[test]
    fn serializes_with_normalized_keys() {
        let info = ContactInfo {
            name: Some("N".into()),
            facebook_name: Some(FieldValue::Single("fb".into())),
            ..ContactInfo::default()
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["facebookName"], "fb");
        assert!(value.get("email").is_none());
        assert_eq!(value["firstName"], Value::Null);
    }
}
