//! Data models for Libraria

pub mod book;
pub mod enums;
pub mod fine;
pub mod issue;
pub mod membership;
pub mod payment;
pub mod reservation;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use book::{Book, NewBook, UpdateBook};
pub use enums::{IssueStatus, MembershipType, PaymentMethod, PaymentStatus, ReservationStatus, Role};
pub use fine::{Fine, FineFilter, FineSummary, UnpaidTotals};
pub use issue::{IssueFilter, IssueRecord};
pub use membership::{AssignBarcode, Membership, RegisterMembership, UpgradeMembership};
pub use payment::{Payment, PaymentFilter, RecordPayment};
pub use reservation::{BookQueue, Reservation, ReservationFilter};

/// Who is acting. Passed explicitly into every operation that cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i32,
    pub role: Role,
}

impl Actor {
    pub fn student(user_id: i32) -> Self {
        Self { user_id, role: Role::Student }
    }

    pub fn librarian(user_id: i32) -> Self {
        Self { user_id, role: Role::Librarian }
    }

    /// Staff, or the student the resource belongs to
    pub fn may_act_for(&self, owner_id: i32) -> bool {
        self.role.is_staff() || self.user_id == owner_id
    }
}
