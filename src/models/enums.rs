//! Shared domain enums
//!
//! Persisted enums are stored as SMALLINT; the discriminants are part of the
//! schema and must not be renumbered.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// IssueStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an issue record: `Issued -> Returned`, nothing else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum IssueStatus {
    Issued = 0,
    Returned = 1,
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            IssueStatus::Issued => "Issued",
            IssueStatus::Returned => "Returned",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ReservationStatus
// ---------------------------------------------------------------------------

/// `Pending -> Active -> Fulfilled | Cancelled | Expired`.
/// Pending reservations may also be cancelled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ReservationStatus {
    /// Waiting for a copy
    Pending = 0,
    /// A copy is held for the reservant
    Active = 1,
    Fulfilled = 2,
    Cancelled = 3,
    /// The hold lapsed before the reservant collected the copy
    Expired = 4,
}

impl ReservationStatus {
    /// Pending and Active reservations make up the queue of a book
    pub fn is_open(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Active)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Active => "Active",
            ReservationStatus::Fulfilled => "Fulfilled",
            ReservationStatus::Cancelled => "Cancelled",
            ReservationStatus::Expired => "Expired",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// MembershipType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum MembershipType {
    Standard = 0,
    Premium = 1,
}

impl std::fmt::Display for MembershipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MembershipType::Standard => "Standard",
            MembershipType::Premium => "Premium",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PaymentMethod {
    /// Paid in cash at the counter
    CashOnDelivery = 0,
    /// Paid through a mobile wallet, identified by its transaction reference
    MobileReference = 1,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PaymentMethod::CashOnDelivery => "Cash on delivery",
            PaymentMethod::MobileReference => "Mobile payment",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PaymentStatus {
    Pending = 0,
    PendingVerification = 1,
    Paid = 2,
    Rejected = 3,
}

impl PaymentStatus {
    /// Waiting for a librarian to confirm or reject
    pub fn is_outstanding(self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::PendingVerification)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::PendingVerification => "Pending verification",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Rejected => "Rejected",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Role carried by the identity token; not persisted here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Librarian,
    Student,
}

impl Role {
    /// Admins can do everything librarians can
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Librarian)
    }
}
