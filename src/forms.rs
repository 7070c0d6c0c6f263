//! Form payloads and their validation.
//!
//! Validation never touches the database; handlers add uniqueness and
//! lookup errors on top of what is returned here.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::structs::{NewInventory, PpeCategory, PpeType, QuantityRule};

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CODE: &str = "Sorry, this is an invalid code.";
const MAX_NAME_LEN: usize = 255;
const MAX_FORMS: usize = 100;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FormErrors {
    pub fields: BTreeMap<String, Vec<String>>,
    pub non_field: Vec<String>,
}

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn add_non_field(&mut self, message: impl Into<String>) {
        self.non_field.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.non_field.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

fn validate_password_pair(password1: &str, password2: &str, errors: &mut FormErrors) {
    if password1.is_empty() {
        errors.add("password1", REQUIRED);
        return;
    }
    if password1 != password2 {
        errors.add("password2", "The two password fields didn't match.");
    }
    if password1.len() < 12 {
        errors.add("password1", "Password must be at least 12 characters long.");
    }
    if password1.len() > 128 {
        errors.add("password1", "Password must be at most 128 characters long.");
    }
    if !password1.chars().any(|c| c.is_ascii_digit())
        || !password1.chars().any(|c| c.is_alphabetic())
        || !password1
            .chars()
            .any(|c| "!@#$%^&*()_+-=[]{}|;':\",.<>?/".contains(c))
    {
        errors.add(
            "password1",
            "Password must contain at least one number, one letter and one special character.",
        );
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default, skip_serializing)]
    pub password1: String,
    #[serde(default, skip_serializing)]
    pub password2: String,
}

impl RegisterForm {
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();

        let username = self.username.trim();
        if username.is_empty() {
            errors.add("username", REQUIRED);
        } else if username.len() > 150
            || !username
                .chars()
                .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
        {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        }

        let email = self.email.trim();
        if email.is_empty() {
            errors.add("email", REQUIRED);
        } else if !email.contains('@') || email.len() > 255 {
            errors.add("email", "Enter a valid email address.");
        }

        if self.timezone.parse::<Tz>().is_err() {
            errors.add("timezone", "Select a valid timezone.");
        }

        validate_password_pair(&self.password1, &self.password2, &mut errors);
        errors
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ConnectForm {
    #[serde(default)]
    pub organization_code: String,
}

impl ConnectForm {
    /// The code in its stored (hyphenated, lowercase) form.
    pub fn normalized_code(&self) -> Result<String, FormErrors> {
        let mut errors = FormErrors::default();
        let raw = self.organization_code.trim();
        if raw.is_empty() {
            errors.add("organization_code", REQUIRED);
            return Err(errors);
        }
        match uuid::Uuid::parse_str(raw) {
            Ok(code) => Ok(code.hyphenated().to_string()),
            Err(_) => {
                errors.add("organization_code", INVALID_CODE);
                Err(errors)
            }
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct OrganizationForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_code: String,
}

impl OrganizationForm {
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        let name = self.name.trim();
        if name.is_empty() {
            errors.add("name", REQUIRED);
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.add("name", "Ensure this value has at most 255 characters.");
        }
        let parent_code = self.parent_code.trim();
        if !parent_code.is_empty() && uuid::Uuid::parse_str(parent_code).is_err() {
            errors.add("parent_code", INVALID_CODE);
        }
        errors
    }

    pub fn parent_code(&self) -> Option<String> {
        uuid::Uuid::parse_str(self.parent_code.trim())
            .ok()
            .map(|code| code.hyphenated().to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PasswordResetForm {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SetPasswordForm {
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

impl SetPasswordForm {
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        validate_password_pair(&self.password1, &self.password2, &mut errors);
        errors
    }
}

/// Raw values of one formset row as posted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowInput {
    pub ppetype: String,
    pub number: String,
    pub container_count: String,
    pub item_number: String,
    pub daily_use: String,
    pub projected_daily_use: String,
    pub projected_run_out: String,
    pub comments: String,
}

impl RowInput {
    fn is_blank(&self) -> bool {
        [
            &self.ppetype,
            &self.number,
            &self.container_count,
            &self.item_number,
            &self.daily_use,
            &self.projected_daily_use,
            &self.projected_run_out,
            &self.comments,
        ]
        .iter()
        .all(|v| v.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormsetErrors {
    /// One entry per row, aligned with [`TrackFormset::rows`].
    pub rows: Vec<FormErrors>,
    pub non_form: Vec<String>,
}

impl FormsetErrors {
    pub fn is_empty(&self) -> bool {
        self.non_form.is_empty() && self.rows.iter().all(FormErrors::is_empty)
    }
}

/// A submission formset for one equipment category.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormset {
    pub category: PpeCategory,
    pub rows: Vec<RowInput>,
}

/// Largest count or stored quantity a row may carry.
const MAX_COUNT: i64 = i32::MAX as i64;

fn parse_count(raw: &str) -> Result<Option<i64>, &'static str> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i64>() {
        Ok(v) if v < 0 => Err("Ensure this value is greater than or equal to 0."),
        Ok(v) if v > MAX_COUNT => Err("Ensure this value is less than or equal to 2147483647."),
        Ok(v) => Ok(Some(v)),
        Err(_) => Err("Enter a whole number."),
    }
}

impl TrackFormset {
    pub fn empty(category: PpeCategory) -> Self {
        TrackFormset {
            category,
            rows: vec![RowInput::default()],
        }
    }

    /// Builds the formset from `form-{i}-{field}` pairs.
    pub fn from_pairs(category: PpeCategory, pairs: &[(String, String)]) -> Self {
        let container_field = match category.quantity_rule() {
            QuantityRule::PerContainer { field, .. } => Some(field),
            QuantityRule::Direct => None,
        };

        let declared = pairs
            .iter()
            .find(|(k, _)| k == "form-TOTAL_FORMS")
            .and_then(|(_, v)| v.trim().parse::<usize>().ok());

        let mut rows: BTreeMap<usize, RowInput> = BTreeMap::new();
        for (key, value) in pairs {
            let Some(rest) = key.strip_prefix("form-") else {
                continue;
            };
            let Some((index, field)) = rest.split_once('-') else {
                continue;
            };
            let Ok(index) = index.parse::<usize>() else {
                continue;
            };
            if index >= MAX_FORMS || declared.is_some_and(|total| index >= total) {
                continue;
            }
            let row = rows.entry(index).or_default();
            let value = value.clone();
            match field {
                "ppetype" => row.ppetype = value,
                "number" => row.number = value,
                "item_number" => row.item_number = value,
                "daily_use" => row.daily_use = value,
                "projected_daily_use" => row.projected_daily_use = value,
                "projected_run_out" => row.projected_run_out = value,
                "comments" => row.comments = value,
                f if Some(f) == container_field => row.container_count = value,
                _ => {}
            }
        }

        let total = declared
            .unwrap_or_else(|| rows.keys().next_back().map_or(0, |i| i + 1))
            .min(MAX_FORMS);
        let rows = (0..total)
            .map(|i| rows.remove(&i).unwrap_or_default())
            .collect();
        TrackFormset { category, rows }
    }

    /// Validates every row against the category's catalog and quantity rule.
    /// Blank rows are skipped; nothing is returned unless every row is valid.
    pub fn validate(&self, choices: &[PpeType]) -> Result<Vec<NewInventory>, FormsetErrors> {
        let mut errors = FormsetErrors {
            rows: vec![FormErrors::default(); self.rows.len()],
            non_form: Vec::new(),
        };
        let mut valid = Vec::new();
        let mut seen = HashSet::new();

        for (row, row_errors) in self.rows.iter().zip(errors.rows.iter_mut()) {
            if row.is_blank() {
                continue;
            }
            if let Some(item) = self.validate_row(row, choices, row_errors) {
                if !seen.insert(item.ppe_type_id) {
                    errors
                        .non_form
                        .push("Please submit each PPE type only once.".to_string());
                }
                valid.push(item);
            }
        }

        if self.rows.iter().all(RowInput::is_blank) {
            errors
                .non_form
                .push("Please fill in at least one item.".to_string());
        }
        errors.non_form.dedup();

        if errors.is_empty() {
            Ok(valid)
        } else {
            Err(errors)
        }
    }

    fn validate_row(
        &self,
        row: &RowInput,
        choices: &[PpeType],
        errors: &mut FormErrors,
    ) -> Option<NewInventory> {
        let ppe_type_id = match row.ppetype.trim() {
            "" => {
                errors.add("ppetype", REQUIRED);
                None
            }
            raw => {
                let id = raw
                    .parse::<i64>()
                    .ok()
                    .filter(|id| {
                        choices
                            .iter()
                            .any(|p| p.id == *id && p.item_type == self.category)
                    });
                if id.is_none() {
                    errors.add(
                        "ppetype",
                        "Select a valid choice. That choice is not one of the available choices.",
                    );
                }
                id
            }
        };

        let mut required_count = |field: &str, raw: &str| match parse_count(raw) {
            Ok(Some(v)) => Some(v),
            Ok(None) => {
                errors.add(field, REQUIRED);
                None
            }
            Err(msg) => {
                errors.add(field, msg);
                None
            }
        };

        let units = required_count("number", &row.number);
        let number = match self.category.quantity_rule() {
            QuantityRule::Direct => units,
            QuantityRule::PerContainer { field, .. } => {
                let containers = required_count(field, &row.container_count);
                match units.zip(containers) {
                    Some((u, c)) => {
                        let total = u.checked_mul(c).filter(|t| *t <= MAX_COUNT);
                        if total.is_none() {
                            errors.add("number", "The total quantity is too large.");
                        }
                        total
                    }
                    None => None,
                }
            }
        };

        let mut optional_count = |field: &str, raw: &str| match parse_count(raw) {
            Ok(v) => v,
            Err(msg) => {
                errors.add(field, msg);
                None
            }
        };
        let daily_use = optional_count("daily_use", &row.daily_use);
        let projected_daily_use = optional_count("projected_daily_use", &row.projected_daily_use);

        let projected_run_out = match row.projected_run_out.trim() {
            "" => None,
            raw => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => {
                    errors.add("projected_run_out", "Enter a valid date.");
                    None
                }
            },
        };

        let item_number = row.item_number.trim().to_string();
        if item_number.chars().count() > MAX_NAME_LEN {
            errors.add("item_number", "Ensure this value has at most 255 characters.");
        }

        if !errors.is_empty() {
            return None;
        }

        Some(NewInventory {
            ppe_type_id: ppe_type_id?,
            number: number?,
            item_number,
            daily_use,
            projected_daily_use,
            projected_run_out,
            comments: row.comments.trim().to_string(),
        })
    }
}
