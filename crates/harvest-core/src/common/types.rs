//! # Domain Records
//!
//! The two durable records the dispatch engine works with, plus the
//! validated inputs that create them.
//!
//! ## Donation lifecycle
//!
//! ```text
//!   open ──(claim CAS)──► claimed      (terminal)
//!     └──(cancel CAS)───► cancelled    (terminal)
//! ```
//!
//! A donation never leaves a terminal status, and `accepted_by` is written
//! exactly once, in the same conditional update that moves it to
//! [`ClaimStatus::Claimed`]. The notified-set only grows, and `round` counts
//! every batch dispatched for the donation (empty batches included).

use crate::{
    Error, Result,
    geo::GeoPoint,
    ids::{DonationId, OrganizationId},
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire format for use-by dates.
pub const USE_BY_FORMAT: &str = "%Y-%m-%d";

/// Claim status of a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Still looking for an organization.
    Open,
    /// An organization won the claim.
    Claimed,
    /// Withdrawn by an operator or by the use-by deadline policy.
    Cancelled,
}

/// A posted surplus-food record awaiting pickup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: DonationId,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub quantity: String,
    pub use_by: NaiveDate,
    pub location: GeoPoint,
    pub address: String,
    pub contact: String,
    pub donor_name: String,
    pub status: ClaimStatus,
    pub accepted_by: Option<OrganizationId>,
    /// Every organization ever notified, in notification order.
    pub notified: Vec<OrganizationId>,
    pub round: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    /// Creates an open donation with an empty notification history.
    #[must_use]
    pub fn open(input: NewDonation, now: DateTime<Utc>) -> Self {
        Self {
            id: DonationId::new(),
            kind: input.kind,
            description: input.description,
            quantity: input.quantity,
            use_by: input.use_by,
            location: input.location,
            address: input.address,
            contact: input.contact,
            donor_name: input.donor_name,
            status: ClaimStatus::Open,
            accepted_by: None,
            notified: Vec::new(),
            round: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ClaimStatus::Open
    }

    /// Short human-readable description used in notifications.
    #[must_use]
    pub fn food_summary(&self) -> String {
        format!("{} x {} ({})", self.quantity, self.kind, self.description)
    }

    /// The instant the donation stops being useful: the end of its use-by day
    /// in UTC.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.use_by
            .and_time(NaiveTime::default())
            .and_utc()
            + chrono::Duration::days(1)
    }

    #[must_use]
    pub fn was_notified(&self, org: &OrganizationId) -> bool {
        self.notified.contains(org)
    }
}

/// Validated input for posting a donation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDonation {
    pub kind: String,
    pub description: String,
    pub quantity: String,
    pub use_by: NaiveDate,
    pub location: GeoPoint,
    pub address: String,
    pub contact: String,
    pub donor_name: String,
}

/// Raw donation form as posted by donors. Every field is optional so that
/// missing input surfaces as a validation message instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonationForm {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub use_by: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub donor_name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl TryFrom<DonationForm> for NewDonation {
    type Error = Error;

    fn try_from(form: DonationForm) -> Result<Self> {
        fn required(field: &'static str, value: Option<String>) -> Result<String> {
            match value.map(|v| v.trim().to_string()) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(Error::InvalidRequest {
                    reason: format!("missing field `{field}`"),
                }),
            }
        }

        let kind = required("type", form.kind)?;
        let description = required("description", form.description)?;
        let quantity = required("quantity", form.quantity)?;
        let use_by_raw = required("use_by", form.use_by)?;
        let address = required("address", form.address)?;
        let contact = required("contact", form.contact)?;
        let donor_name = required("donor_name", form.donor_name)?;

        let use_by = NaiveDate::parse_from_str(&use_by_raw, USE_BY_FORMAT).map_err(|_| {
            Error::InvalidRequest {
                reason: format!("invalid use_by date `{use_by_raw}`, expected YYYY-MM-DD"),
            }
        })?;

        let (Some(lng), Some(lat)) = (form.lng, form.lat) else {
            return Err(Error::InvalidRequest {
                reason: "missing field `lat`/`lng`".to_string(),
            });
        };
        let location = GeoPoint::new(lng, lat)?;

        Ok(Self {
            kind,
            description,
            quantity,
            use_by,
            location,
            address,
            contact,
            donor_name,
        })
    }
}

/// A recipient organization. Read-only from the dispatch engine's point of
/// view; only the registration flow writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration form for an organization. When `organization_id` is present
/// the existing record is updated in place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    pub organization_id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Validated registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub organization_id: Option<OrganizationId>,
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
}

impl TryFrom<RegistrationForm> for Registration {
    type Error = Error;

    fn try_from(form: RegistrationForm) -> Result<Self> {
        let organization_id = form
            .organization_id
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.parse::<OrganizationId>())
            .transpose()?;

        let name = form
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidRequest {
                reason: "missing field `name`".to_string(),
            })?;

        let location = GeoPoint::new(form.lng.unwrap_or(0.0), form.lat.unwrap_or(0.0))?;

        Ok(Self {
            organization_id,
            name,
            address: form.address.unwrap_or_default().trim().to_string(),
            location,
        })
    }
}

impl Registration {
    /// Materializes the registration as an active organization. `existing`
    /// carries the record being updated, whose id and creation time are kept.
    #[must_use]
    pub fn into_organization(
        self,
        existing: Option<&Organization>,
        now: DateTime<Utc>,
    ) -> Organization {
        let (id, created_at) = match existing {
            Some(org) => (org.id, org.created_at),
            None => (self.organization_id.unwrap_or_default(), now),
        };

        Organization {
            id,
            name: self.name,
            address: self.address,
            location: self.location,
            active: true,
            created_at,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> DonationForm {
        DonationForm {
            kind: Some("cooked".into()),
            description: Some("rice and dal".into()),
            quantity: Some("20 plates".into()),
            use_by: Some("2026-10-20".into()),
            address: Some("Sector 5".into()),
            contact: Some("555-0100".into()),
            donor_name: Some("Saffron Kitchen".into()),
            lat: Some(28.0),
            lng: Some(77.0),
        }
    }

    #[test]
    fn valid_form_becomes_open_donation() {
        let input = NewDonation::try_from(form()).unwrap();
        let now = Utc::now();
        let donation = Donation::open(input, now);

        assert!(donation.is_open());
        assert_eq!(donation.round, 0);
        assert!(donation.notified.is_empty());
        assert!(donation.accepted_by.is_none());
        assert_eq!(donation.location, GeoPoint { lng: 77.0, lat: 28.0 });
        assert_eq!(donation.food_summary(), "20 plates x cooked (rice and dal)");
    }

    #[test]
    fn blank_fields_are_reported_by_name() {
        let mut f = form();
        f.contact = Some("   ".into());
        let err = NewDonation::try_from(f).unwrap_err();
        assert!(err.to_string().contains("`contact`"), "{err}");
    }

    #[test]
    fn bad_date_is_rejected() {
        let mut f = form();
        f.use_by = Some("20/10/2026".into());
        assert!(matches!(
            NewDonation::try_from(f),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn expiry_is_end_of_use_by_day() {
        let donation = Donation::open(NewDonation::try_from(form()).unwrap(), Utc::now());
        assert_eq!(
            donation.expires_at().to_rfc3339(),
            "2026-10-21T00:00:00+00:00"
        );
    }

    #[test]
    fn registration_update_keeps_identity_and_creation_time() {
        let earlier = Utc::now() - chrono::Duration::days(3);
        let first = Registration::try_from(RegistrationForm {
            name: Some("Night Shelter".into()),
            lat: Some(28.0),
            lng: Some(77.0),
            ..Default::default()
        })
        .unwrap()
        .into_organization(None, earlier);

        let update = Registration::try_from(RegistrationForm {
            organization_id: Some(first.id.to_string()),
            name: Some("Night Shelter East".into()),
            lat: Some(28.1),
            lng: Some(77.1),
            ..Default::default()
        })
        .unwrap();
        let now = Utc::now();
        let second = update.into_organization(Some(&first), now);

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, earlier);
        assert_eq!(second.updated_at, now);
        assert_eq!(second.name, "Night Shelter East");
        assert!(second.active);
    }

    #[test]
    fn registration_rejects_malformed_id() {
        let err = Registration::try_from(RegistrationForm {
            organization_id: Some("bogus".into()),
            name: Some("x".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidId { .. }));
    }
}
