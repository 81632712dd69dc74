//! Service request model
//!
//! A `ServiceRequest` is the unit of work on the marketplace: a trucker
//! describes a breakdown, providers browse and accept. The status field is
//! owned exclusively by the lifecycle manager; nothing else mutates it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection name for service requests
pub const REQUEST_COLLECTION: &str = "requests";

/// Kind of roadside service being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Towing,
    Repair,
    Mechanic,
    Tire,
    Wash,
    Hose,
}

/// How quickly the trucker needs help
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Lifecycle status of a service request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Which party cancelled a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Trucker,
    Provider,
}

/// Where the truck is stranded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Free-text address
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Input for creating a new service request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequestInput {
    pub trucker_id: String,
    pub trucker_name: String,
    pub trucker_phone: String,
    pub service_type: ServiceType,
    pub urgency: Urgency,
    pub description: String,
    pub location: Location,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub estimated_cost: Option<Decimal>,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// A service request as persisted and cached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: String,

    pub trucker_id: String,
    pub trucker_name: String,
    pub trucker_phone: String,

    pub service_type: ServiceType,
    pub urgency: Urgency,
    pub description: String,
    pub location: Location,

    pub status: RequestStatus,

    /// Set iff status is accepted, in_progress or completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelledBy>,

    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub estimated_cost: Option<Decimal>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl ServiceRequest {
    /// Create a new pending request from creation input
    pub fn new(input: CreateRequestInput) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trucker_id: input.trucker_id,
            trucker_name: input.trucker_name,
            trucker_phone: input.trucker_phone,
            service_type: input.service_type,
            urgency: input.urgency,
            description: input.description,
            location: input.location,
            status: RequestStatus::Pending,
            provider_id: None,
            provider_name: None,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            cancelled_by: None,
            estimated_cost: input.estimated_cost,
            photos: input.photos,
        }
    }

    /// Whether the given user is the assigned provider
    pub fn is_assigned_to(&self, provider_id: &str) -> bool {
        self.provider_id.as_deref() == Some(provider_id)
    }
}
