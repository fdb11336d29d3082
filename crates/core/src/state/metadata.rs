//! # Project Metadata
//!
//! Global context shared by every stage: who the company is, where it plays,
//! and who it competes with.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Global project metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectMetadata {
    pub company_name: String,
    pub mission_statement: String,
    pub target_vertical: String,
    pub geography: String,
    pub tam: String,
    pub revenue_model: String,
    pub website_urls: String,
    pub key_competitors: String,
}

/// Addressable metadata field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    CompanyName,
    MissionStatement,
    TargetVertical,
    Geography,
    Tam,
    RevenueModel,
    WebsiteUrls,
    KeyCompetitors,
}

impl MetadataField {
    pub const ALL: [MetadataField; 8] = [
        Self::CompanyName,
        Self::MissionStatement,
        Self::TargetVertical,
        Self::Geography,
        Self::Tam,
        Self::RevenueModel,
        Self::WebsiteUrls,
        Self::KeyCompetitors,
    ];

    /// Fields that gate analysis and navigation. Mission is optional.
    pub const REQUIRED: [MetadataField; 7] = [
        Self::CompanyName,
        Self::TargetVertical,
        Self::Geography,
        Self::Tam,
        Self::RevenueModel,
        Self::WebsiteUrls,
        Self::KeyCompetitors,
    ];

    /// Label used in prompts and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            Self::CompanyName => "Company Name",
            Self::MissionStatement => "Mission",
            Self::TargetVertical => "Target Vertical",
            Self::Geography => "Geography",
            Self::Tam => "TAM",
            Self::RevenueModel => "Revenue Model",
            Self::WebsiteUrls => "Global Websites",
            Self::KeyCompetitors => "Competitors",
        }
    }
}

impl FromStr for MetadataField {
    type Err = String;

    /// Accepts `companyName`, `company_name` and `company-name` spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "companyname" | "company" => Ok(Self::CompanyName),
            "missionstatement" | "mission" => Ok(Self::MissionStatement),
            "targetvertical" | "vertical" => Ok(Self::TargetVertical),
            "geography" => Ok(Self::Geography),
            "tam" => Ok(Self::Tam),
            "revenuemodel" => Ok(Self::RevenueModel),
            "websiteurls" | "websites" => Ok(Self::WebsiteUrls),
            "keycompetitors" | "competitors" => Ok(Self::KeyCompetitors),
            _ => Err(format!("Unknown metadata field: {}", s)),
        }
    }
}

impl ProjectMetadata {
    pub fn get(&self, field: MetadataField) -> &str {
        match field {
            MetadataField::CompanyName => &self.company_name,
            MetadataField::MissionStatement => &self.mission_statement,
            MetadataField::TargetVertical => &self.target_vertical,
            MetadataField::Geography => &self.geography,
            MetadataField::Tam => &self.tam,
            MetadataField::RevenueModel => &self.revenue_model,
            MetadataField::WebsiteUrls => &self.website_urls,
            MetadataField::KeyCompetitors => &self.key_competitors,
        }
    }

    /// Copy with one field replaced
    pub fn with_field(&self, field: MetadataField, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let slot = match field {
            MetadataField::CompanyName => &mut next.company_name,
            MetadataField::MissionStatement => &mut next.mission_statement,
            MetadataField::TargetVertical => &mut next.target_vertical,
            MetadataField::Geography => &mut next.geography,
            MetadataField::Tam => &mut next.tam,
            MetadataField::RevenueModel => &mut next.revenue_model,
            MetadataField::WebsiteUrls => &mut next.website_urls,
            MetadataField::KeyCompetitors => &mut next.key_competitors,
        };
        *slot = value.into();
        next
    }

    /// True when every required field is non-empty
    pub fn is_complete(&self) -> bool {
        MetadataField::REQUIRED
            .iter()
            .all(|field| !self.get(*field).is_empty())
    }

    /// Required fields that are still empty
    pub fn missing_fields(&self) -> Vec<MetadataField> {
        MetadataField::REQUIRED
            .iter()
            .copied()
            .filter(|field| self.get(*field).is_empty())
            .collect()
    }

    /// Number of non-empty fields out of all eight
    pub fn filled_count(&self) -> usize {
        MetadataField::ALL
            .iter()
            .filter(|field| !self.get(**field).is_empty())
            .count()
    }
}
