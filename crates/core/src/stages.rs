//! # Stage Registry
//!
//! The four discovery stages and their static configuration: titles, UI copy,
//! agent system instructions and the status messages cycled while a stage is
//! being analyzed.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DiscoveryError;

/// How often the "analyzing" status message advances
pub const STATUS_ROTATION_INTERVAL: Duration = Duration::from_millis(2500);

/// One of the four fixed discovery phases, in pipeline order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiscoveryStage {
    /// Domain strategy
    #[default]
    Domain,
    /// Business overview document
    Bod,
    /// Metrics and performance
    Kpi,
    /// Epics and user stories
    Epics,
}

impl DiscoveryStage {
    /// All stages in pipeline order
    pub const ALL: [DiscoveryStage; 4] = [Self::Domain, Self::Bod, Self::Kpi, Self::Epics];

    /// Wire identifier (`DOMAIN`, `BOD`, `KPI`, `EPICS`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "DOMAIN",
            Self::Bod => "BOD",
            Self::Kpi => "KPI",
            Self::Epics => "EPICS",
        }
    }

    /// Zero-based position in the pipeline
    pub fn index(&self) -> usize {
        match self {
            Self::Domain => 0,
            Self::Bod => 1,
            Self::Kpi => 2,
            Self::Epics => 3,
        }
    }

    /// Stages that come before this one
    pub fn previous_stages(&self) -> &'static [DiscoveryStage] {
        &Self::ALL[..self.index()]
    }

    /// The stage after this one, if any
    pub fn next(&self) -> Option<DiscoveryStage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Static configuration for this stage
    pub fn config(&self) -> &'static StageConfig {
        match self {
            Self::Domain => &DOMAIN_CONFIG,
            Self::Bod => &BOD_CONFIG,
            Self::Kpi => &KPI_CONFIG,
            Self::Epics => &EPICS_CONFIG,
        }
    }
}

impl fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryStage {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DOMAIN" => Ok(Self::Domain),
            "BOD" => Ok(Self::Bod),
            "KPI" => Ok(Self::Kpi),
            "EPICS" => Ok(Self::Epics),
            _ => Err(DiscoveryError::UnknownStage(s.to_string())),
        }
    }
}

/// Static per-stage configuration
#[derive(Debug)]
pub struct StageConfig {
    pub title: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub agent_name: &'static str,
    pub placeholder: &'static str,
    pub cta: &'static str,
    pub system_instruction: &'static str,
    pub status_messages: &'static [&'static str],
}

impl StageConfig {
    /// Status message for the given rotation tick (wraps around)
    pub fn status_message(&self, tick: usize) -> &'static str {
        self.status_messages[tick % self.status_messages.len()]
    }
}

static DOMAIN_CONFIG: StageConfig = StageConfig {
    title: "Domain Strategy",
    label: "Domain",
    description: "Map the strategic landscape and identify core objectives.",
    agent_name: "Strategy Orchestrator",
    placeholder: "Start by describing your product vision, the problem you're solving, or a raw business case...",
    cta: "Synthesize Domain",
    system_instruction: r####"You are an expert Strategic Product Analyst.
Analyze the problem statement and business context.
Your output MUST include:
1. A detailed Domain Analysis (Market, Users, Value Prop, Risks).
2. A "COMPETITIVE INTELLIGENCE" section: based on the provided competitors and vertical, identify 3-5 direct and indirect competitors. Use a table to compare their key strengths and critical weaknesses.
3. A "DIFFERENTIATION STRATEGY" section: propose 3-5 unique value propositions or "Strategic Moats" that differentiate the product from the competition.
4. A section titled "### CLARIFICATION QUESTIONS" containing exactly 3-5 numbered questions for the user to answer to help refine the Business Overview Document in the next stage.
Format the response with clear headers and professional structure."####,
    status_messages: &[
        "Parsing strategic objectives...",
        "Mapping competitive landscape...",
        "Identifying user archetypes...",
        "Formulating structural questions...",
    ],
};

static BOD_CONFIG: StageConfig = StageConfig {
    title: "Business Overview Document (BOD)",
    label: "BOD",
    description: "Construct a deep dive into the business logic and entity architecture.",
    agent_name: "Business Architect",
    placeholder: "Provide additional details on operational flows or business constraints...",
    cta: "Draft BOD",
    system_instruction: r####"You are a Senior Business Architect.
Based on the Domain Analysis and previous context, create a Business Overview Document.
Define: Business Goals, Scope, Core Entities, and Process Flows.

Include a "STRATEGIC POSITIONING" section that deepens the competitive analysis by defining how the product's business logic (pricing, exclusive data access, network effects) creates a sustainable advantage over the competitors previously identified.

If a reference format file is provided, strictly adhere to its sections, table structures, and professional tone.
Your output MUST include a section titled "### CLARIFICATION QUESTIONS" with 3-5 specific numbered questions to refine the KPI definition.
Use tables for entity definitions."####,
    status_messages: &[
        "Defining business scope...",
        "Extracting core entities...",
        "Mapping operational flows...",
        "Validating business logic...",
        "Formulating refinement questions...",
    ],
};

static KPI_CONFIG: StageConfig = StageConfig {
    title: "Metrics & Performance",
    label: "KPIs",
    description: "Establish the success criteria and measurement framework.",
    agent_name: "Performance Analyst",
    placeholder: "Specify business goals, industry benchmarks, or data tracking requirements...",
    cta: "Establish Metrics",
    system_instruction: r####"You are a Product Data Scientist.
Define the North Star, leading, and lagging indicators based on the provided BOD and Domain.
Provide measurement strategies and success thresholds.
If a reference format file is provided, strictly follow its data visualization and metrics reporting structure.
Your output MUST include a section titled "### CLARIFICATION QUESTIONS" with 3-5 numbered questions to help detailed story mapping in the final stage."####,
    status_messages: &[
        "Defining growth levers...",
        "Calculating success thresholds...",
        "Mapping data sources...",
        "Aligning with business value...",
    ],
};

static EPICS_CONFIG: StageConfig = StageConfig {
    title: "Epics & User Stories",
    label: "Backlog",
    description: "Transform strategy into an executable engineering backlog.",
    agent_name: "TPM Backlog Agent",
    placeholder: "Tech stack constraints, team capacity, or non-functional requirements...",
    cta: "Generate Backlog",
    system_instruction: r####"You are a Technical Product Manager.
Convert everything into high-level Engineering Epics and granular User Stories.
Address both Functional and Non-Functional requirements (Security, Performance, Scale).
If a reference format file is provided, strictly use its Story and Epic templates.
For each Epic provide a User Story (As a... I want... So that...) and Acceptance Criteria.
Your output MUST include a final "### CLARIFICATION QUESTIONS" section with numbered questions for any implementation ambiguities."####,
    status_messages: &[
        "Decomposing into epics...",
        "Writing technical user stories...",
        "Defining Gherkin ACs...",
        "Drafting non-functional requirements...",
        "Prioritizing by strategic value...",
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(DiscoveryStage::Domain.previous_stages().is_empty());
        assert_eq!(
            DiscoveryStage::Kpi.previous_stages(),
            &[DiscoveryStage::Domain, DiscoveryStage::Bod]
        );
        assert_eq!(DiscoveryStage::Kpi.next(), Some(DiscoveryStage::Epics));
        assert_eq!(DiscoveryStage::Epics.next(), None);
    }

    #[test]
    fn test_parse_stage() {
        assert_eq!("bod".parse::<DiscoveryStage>(), Ok(DiscoveryStage::Bod));
        assert_eq!(" EPICS ".parse::<DiscoveryStage>(), Ok(DiscoveryStage::Epics));
        assert_eq!(
            "roadmap".parse::<DiscoveryStage>(),
            Err(DiscoveryError::UnknownStage("roadmap".to_string()))
        );
    }

    #[test]
    fn test_wire_identifiers() {
        let json = serde_json::to_string(&DiscoveryStage::Kpi).unwrap();
        assert_eq!(json, "\"KPI\"");
        let stage: DiscoveryStage = serde_json::from_str("\"EPICS\"").unwrap();
        assert_eq!(stage, DiscoveryStage::Epics);
    }

    #[test]
    fn test_every_instruction_asks_for_questions() {
        for stage in DiscoveryStage::ALL {
            let config = stage.config();
            assert!(config
                .system_instruction
                .contains("CLARIFICATION QUESTIONS"));
            assert!(!config.status_messages.is_empty());
        }
    }

    #[test]
    fn test_status_message_wraps() {
        let config = DiscoveryStage::Domain.config();
        assert_eq!(config.status_message(0), config.status_message(4));
    }
}
