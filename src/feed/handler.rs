//! Turns result messages into raw distribution templates

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{FeedHandler, FeedMessage};
use crate::error::{Error, Result};
use crate::storage::{SharedTemplateRepository, TemplateKind, TemplateRow};
use crate::template::{DistributionTemplate, RawScore};

/// Historical results for one round slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub competition_id: u32,
    pub round_slot: u32,
    pub results: Vec<ResultScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultScore {
    pub match_id: u64,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl From<ResultScore> for RawScore {
    fn from(score: ResultScore) -> Self {
        RawScore {
            match_id: score.match_id,
            home_goals: score.home_goals,
            away_goals: score.away_goals,
        }
    }
}

impl ResultMessage {
    pub fn into_row(self) -> Result<TemplateRow> {
        if self.results.is_empty() {
            return Err(Error::malformed_template(format!(
                "result message for competition {} slot {} has no results",
                self.competition_id, self.round_slot
            )));
        }

        let scores: Vec<RawScore> = self.results.into_iter().map(RawScore::from).collect();
        Ok(TemplateRow::new(
            self.competition_id,
            self.round_slot,
            TemplateKind::Raw,
            DistributionTemplate::encode_raw(&scores),
        ))
    }
}

pub struct TemplateIngestHandler {
    templates: SharedTemplateRepository,
}

impl TemplateIngestHandler {
    pub fn new(templates: SharedTemplateRepository) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl FeedHandler for TemplateIngestHandler {
    async fn handle(&self, message: &FeedMessage) -> Result<()> {
        let decoded: ResultMessage = serde_json::from_str(&message.payload)?;
        let row = decoded.into_row()?;
        self.templates.upsert(&row)?;

        tracing::debug!(
            queue = %message.queue,
            competition = row.competition_id,
            slot = row.round_slot,
            "Stored raw template from result feed"
        );
        Ok(())
    }
}
