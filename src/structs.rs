use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub pwd_hash: String,
    pub organization_id: Option<i64>,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_onboarded(&self) -> bool {
        self.organization_id.is_some()
    }

    /// The user's configured timezone, UTC when the stored name is unknown.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub parent_id: Option<i64>,
    pub is_provider: bool,
    pub created_at: DateTime<Utc>,
}

/// Equipment categories tracked by the application.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PpeCategory {
    #[serde(rename = "n95mask")]
    #[sqlx(rename = "n95mask")]
    N95Mask,
    Gloves,
    Alcohol,
    Swab,
    Gowns,
    FaceMask,
}

/// How the entered count of a submission row becomes the persisted quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityRule {
    Direct,
    /// Entered count is units per container, multiplied by a container count.
    PerContainer {
        field: &'static str,
        label: &'static str,
    },
}

impl PpeCategory {
    pub const ALL: [PpeCategory; 6] = [
        PpeCategory::N95Mask,
        PpeCategory::Gloves,
        PpeCategory::Alcohol,
        PpeCategory::Swab,
        PpeCategory::Gowns,
        PpeCategory::FaceMask,
    ];

    /// Value stored in `ppe_types.item_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PpeCategory::N95Mask => "n95mask",
            PpeCategory::Gloves => "gloves",
            PpeCategory::Alcohol => "alcohol",
            PpeCategory::Swab => "swab",
            PpeCategory::Gowns => "gowns",
            PpeCategory::FaceMask => "face_mask",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PpeCategory::N95Mask => "N95 Masks",
            PpeCategory::Gloves => "Gloves",
            PpeCategory::Alcohol => "Alcohol Solutions",
            PpeCategory::Swab => "Swabs",
            PpeCategory::Gowns => "Gowns",
            PpeCategory::FaceMask => "Non-N95 Face Masks",
        }
    }

    /// Path segment under `/track/`.
    pub fn slug(&self) -> &'static str {
        match self {
            PpeCategory::N95Mask => "n95-masks",
            PpeCategory::Gloves => "gloves",
            PpeCategory::Alcohol => "alcohol",
            PpeCategory::Swab => "swab",
            PpeCategory::Gowns => "gowns",
            PpeCategory::FaceMask => "face-mask",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.slug() == slug)
    }

    pub fn quantity_rule(&self) -> QuantityRule {
        match self {
            PpeCategory::Gloves => QuantityRule::PerContainer {
                field: "box_count",
                label: "Number of boxes",
            },
            PpeCategory::Swab => QuantityRule::PerContainer {
                field: "package_count",
                label: "Number of packages",
            },
            _ => QuantityRule::Direct,
        }
    }

    /// Label of the count field on the submission form.
    pub fn count_label(&self) -> &'static str {
        match self {
            PpeCategory::Gloves => "Glove count (per box)",
            PpeCategory::Swab => "Swab count (per package)",
            PpeCategory::Alcohol => "Number of containers",
            _ => "Current stock",
        }
    }
}

impl fmt::Display for PpeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PpeCategory {
    type Err = String;

    /// Accepts either the stored value or the URL slug.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PpeCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s || c.slug() == s)
            .ok_or_else(|| format!("unknown PPE category: {}", s))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PpeType {
    pub id: i64,
    pub item_type: PpeCategory,
    pub item_attribute: String,
    pub size: String,
}

impl fmt::Display for PpeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({})",
            self.item_type.label(),
            self.item_attribute,
            self.size
        )
    }
}

/// A validated submission row ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInventory {
    pub ppe_type_id: i64,
    pub number: i64,
    pub item_number: String,
    pub daily_use: Option<i64>,
    pub projected_daily_use: Option<i64>,
    pub projected_run_out: Option<NaiveDate>,
    pub comments: String,
}

/// An inventory row joined with its organization and PPE type.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, FromRow)]
pub struct InventoryRecord {
    pub id: i64,
    pub organization_id: i64,
    pub organization_name: String,
    pub user_id: i64,
    pub ppe_type_id: i64,
    pub item_type: PpeCategory,
    pub item_attribute: String,
    pub size: String,
    pub number: i64,
    pub item_number: String,
    pub daily_use: Option<i64>,
    pub projected_daily_use: Option<i64>,
    pub projected_run_out: Option<NaiveDate>,
    pub comments: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PasswordReset {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}
