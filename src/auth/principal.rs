//! Caller identity and tenant authorization

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LendingError;
use crate::loan::Loan;

/// Role carried by a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Merchant,
    Partner,
    Admin,
    /// Internal callers: the enforcement sweeper and the gateway bridge
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Merchant => "merchant",
            Role::Partner => "partner",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }

    /// Roles that may appear in a bearer token. `system` is never issued.
    pub fn from_claim(role: &str) -> Option<Self> {
        match role {
            "merchant" => Some(Role::Merchant),
            "partner" => Some(Role::Partner),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller of a lending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub tenant_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn merchant(tenant_id: Uuid) -> Self {
        Self {
            subject: format!("merchant:{}", tenant_id),
            tenant_id,
            role: Role::Merchant,
        }
    }

    pub fn system() -> Self {
        Self {
            subject: "system".to_string(),
            tenant_id: Uuid::nil(),
            role: Role::System,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::System)
    }

    /// Only the originating merchant (or an internal caller) may change a loan.
    pub fn authorize_mutation(&self, loan: &Loan) -> Result<(), LendingError> {
        if self.is_privileged() || (self.role == Role::Merchant && self.tenant_id == loan.merchant_id) {
            return Ok(());
        }
        self.reject(loan)
    }

    /// The financing partner may read the loans it funds.
    pub fn authorize_read(&self, loan: &Loan) -> Result<(), LendingError> {
        let allowed = match self.role {
            Role::Admin | Role::System => true,
            Role::Merchant => self.tenant_id == loan.merchant_id,
            Role::Partner => loan.financing_partner_id == Some(self.tenant_id),
        };
        if allowed {
            Ok(())
        } else {
            self.reject(loan)
        }
    }

    fn reject(&self, loan: &Loan) -> Result<(), LendingError> {
        tracing::warn!(
            target: "security",
            subject = %self.subject,
            tenant = %self.tenant_id,
            role = self.role.as_str(),
            loan_id = %loan.id,
            "Cross-tenant access rejected"
        );
        Err(LendingError::TenantMismatch(loan.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::LoanStatus;
    use chrono::Utc;

    fn loan_for(merchant_id: Uuid, partner: Option<Uuid>) -> Loan {
        let now = Utc::now();
        Loan {
            id: Uuid::new_v4(),
            merchant_id,
            customer_id: Uuid::new_v4(),
            device_id: "IMEI-1".to_string(),
            financed_amount: 500_000,
            down_payment: 100_000,
            tenure_months: 4,
            interest_rate_bps: 250,
            financing_partner_id: partner,
            status: LoanStatus::Active,
            created_at: now,
            approved_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_merchant_scoped_to_own_loans() {
        let merchant = Uuid::new_v4();
        let loan = loan_for(merchant, None);

        assert!(Principal::merchant(merchant).authorize_mutation(&loan).is_ok());
        assert_eq!(
            Principal::merchant(Uuid::new_v4()).authorize_mutation(&loan),
            Err(LendingError::TenantMismatch(loan.id))
        );
    }

    #[test]
    fn test_partner_reads_but_never_mutates() {
        let partner_id = Uuid::new_v4();
        let loan = loan_for(Uuid::new_v4(), Some(partner_id));
        let partner = Principal {
            subject: "partner".to_string(),
            tenant_id: partner_id,
            role: Role::Partner,
        };

        assert!(partner.authorize_read(&loan).is_ok());
        assert!(partner.authorize_mutation(&loan).is_err());
    }

    #[test]
    fn test_system_bypasses_tenant_check() {
        let loan = loan_for(Uuid::new_v4(), None);
        assert!(Principal::system().authorize_mutation(&loan).is_ok());
        assert_eq!(Role::from_claim("system"), None);
    }
}
