//! Wedding profile editor.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_engine::{FieldDef, FieldType, ObjectShape, Result, Revision, ShapeDescriptor};

use super::numbers::{u32_lenient, u8_lenient};
use super::SyncContext;
use crate::clock::Clock;
use crate::{DocumentKey, SyncEngine};

/// Shape version of the wedding profile document.
pub const WEDDING_SHAPE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeddingStatus {
    #[default]
    Planning,
    Booked,
    Confirmed,
    Completed,
    Cancelled,
}

/// Completion per planning phase, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeddingProgress {
    #[serde(deserialize_with = "u8_lenient")]
    pub overall: u8,
    #[serde(deserialize_with = "u8_lenient")]
    pub foundation: u8,
    #[serde(deserialize_with = "u8_lenient")]
    pub venue: u8,
    #[serde(deserialize_with = "u8_lenient")]
    pub guests: u8,
    #[serde(deserialize_with = "u8_lenient")]
    pub budget: u8,
    #[serde(deserialize_with = "u8_lenient")]
    pub design: u8,
    #[serde(deserialize_with = "u8_lenient")]
    pub organization: u8,
    #[serde(rename = "final", deserialize_with = "u8_lenient")]
    pub final_phase: u8,
}

impl WeddingProgress {
    fn phases(&self) -> [u8; 7] {
        [
            self.foundation,
            self.venue,
            self.guests,
            self.budget,
            self.design,
            self.organization,
            self.final_phase,
        ]
    }

    /// Rounded mean of the seven phases.
    pub fn computed_overall(&self) -> u8 {
        let phases = self.phases();
        let sum: u32 = phases.iter().map(|&p| u32::from(p)).sum();
        (f64::from(sum) / phases.len() as f64).round() as u8
    }

    fn apply(&mut self, patch: ProgressPatch) {
        let ProgressPatch {
            foundation,
            venue,
            guests,
            budget,
            design,
            organization,
            final_phase,
        } = patch;

        let slots = [
            (&mut self.foundation, foundation),
            (&mut self.venue, venue),
            (&mut self.guests, guests),
            (&mut self.budget, budget),
            (&mut self.design, design),
            (&mut self.organization, organization),
            (&mut self.final_phase, final_phase),
        ];
        for (slot, value) in slots {
            if let Some(value) = value {
                *slot = value.min(100);
            }
        }
        self.overall = self.computed_overall();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressPatch {
    pub foundation: Option<u8>,
    pub venue: Option<u8>,
    pub guests: Option<u8>,
    pub budget: Option<u8>,
    pub design: Option<u8>,
    pub organization: Option<u8>,
    pub final_phase: Option<u8>,
}

/// The synced wedding profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeddingProfile {
    pub bride_name: String,
    pub groom_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wedding_date: Option<NaiveDate>,
    #[serde(deserialize_with = "u32_lenient")]
    pub estimated_guest_count: u32,
    pub budget: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub region: String,
    /// Venue details as entered; the profile does not interpret them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<Value>,
    pub status: WeddingStatus,
    pub progress: WeddingProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update for a [`WeddingProfile`]; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeddingPatch {
    pub bride_name: Option<String>,
    pub groom_name: Option<String>,
    pub wedding_date: Option<NaiveDate>,
    pub estimated_guest_count: Option<u32>,
    pub budget: Option<f64>,
    pub style: Option<String>,
    pub region: Option<String>,
    pub venue: Option<Value>,
    pub status: Option<WeddingStatus>,
}

impl WeddingProfile {
    fn apply(&mut self, patch: WeddingPatch, now: Option<DateTime<Utc>>) {
        let WeddingPatch {
            bride_name,
            groom_name,
            wedding_date,
            estimated_guest_count,
            budget,
            style,
            region,
            venue,
            status,
        } = patch;

        if let Some(v) = bride_name {
            self.bride_name = v;
        }
        if let Some(v) = groom_name {
            self.groom_name = v;
        }
        if let Some(v) = estimated_guest_count {
            self.estimated_guest_count = v;
        }
        if let Some(v) = budget {
            self.budget = v;
        }
        if let Some(v) = region {
            self.region = v;
        }
        if let Some(v) = status {
            self.status = v;
        }
        self.wedding_date = wedding_date.or(self.wedding_date);
        self.style = style.or(self.style.take());
        self.venue = venue.or(self.venue.take());

        self.touch(now);
    }

    fn touch(&mut self, now: Option<DateTime<Utc>>) {
        if self.created_at.is_none() {
            self.created_at = now;
        }
        self.updated_at = now.or(self.updated_at);
    }
}

/// Document shape for the wedding profile.
pub fn wedding_shape() -> ShapeDescriptor {
    let phase = |name: &str| FieldDef::required(name, FieldType::Number, json!(0));
    let progress = ObjectShape::new(vec![
        phase("overall"),
        phase("foundation"),
        phase("venue"),
        phase("guests"),
        phase("budget"),
        phase("design"),
        phase("organization"),
        phase("final"),
    ]);

    ShapeDescriptor::new(
        WEDDING_SHAPE_VERSION,
        vec![
            FieldDef::required("brideName", FieldType::String, json!("")),
            FieldDef::required("groomName", FieldType::String, json!("")),
            FieldDef::optional("weddingDate", FieldType::String),
            FieldDef::required("estimatedGuestCount", FieldType::Number, json!(0)),
            FieldDef::required("budget", FieldType::Number, json!(0.0)),
            FieldDef::optional("style", FieldType::String),
            FieldDef::required("region", FieldType::String, json!("")),
            FieldDef::optional("venue", FieldType::Json),
            FieldDef::required("status", FieldType::String, json!("planning")),
            FieldDef::object("progress", progress),
            FieldDef::optional("createdAt", FieldType::String),
            FieldDef::optional("updatedAt", FieldType::String),
        ],
    )
}

/// Edits the profile of one wedding.
pub struct ProfileEditor {
    engine: SyncEngine<WeddingProfile>,
    clock: Arc<dyn Clock>,
}

impl ProfileEditor {
    pub fn open(ctx: &SyncContext, user_id: &str, wedding_id: &str) -> Result<Self> {
        let key = DocumentKey::new("wedding", user_id, wedding_id);
        let engine = ctx.engine(key, WeddingProfile::default(), wedding_shape())?;
        Ok(Self {
            engine,
            clock: ctx.clock.clone(),
        })
    }

    pub fn engine(&self) -> &SyncEngine<WeddingProfile> {
        &self.engine
    }

    pub fn profile(&self) -> WeddingProfile {
        self.engine.current_state()
    }

    pub fn update(&self, patch: WeddingPatch) -> Result<Revision> {
        let now = self.now();
        self.engine.mutate(|profile| {
            let mut next = profile.clone();
            next.apply(patch, now);
            next
        })
    }

    /// Update some phases and recompute the overall figure.
    pub fn update_progress(&self, patch: ProgressPatch) -> Result<Revision> {
        let now = self.now();
        self.engine.mutate(|profile| {
            let mut next = profile.clone();
            next.progress.apply(patch);
            next.touch(now);
            next
        })
    }

    pub fn dispose(self) {
        self.engine.dispose();
    }

    fn now(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.clock.now_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }
}

impl std::fmt::Debug for ProfileEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileEditor")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
