//! Plan catalog and billing periods

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Small schools
    #[default]
    Starter,
    /// Mid-size schools
    Standard,
    /// Districts and large schools
    Premium,
}

impl PlanTier {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }

    /// Monthly cap for a resource on this tier
    pub fn monthly_limit(&self, resource: Resource) -> u64 {
        use Resource::*;
        match (self, resource) {
            (Self::Starter, Students) => 200,
            (Self::Starter, SmsMessages) => 500,
            (Self::Starter, EmailMessages) => 2_000,
            (Self::Starter, ReportExports) => 50,
            (Self::Starter, StorageMb) => 1_024,

            (Self::Standard, Students) => 1_000,
            (Self::Standard, SmsMessages) => 5_000,
            (Self::Standard, EmailMessages) => 20_000,
            (Self::Standard, ReportExports) => 500,
            (Self::Standard, StorageMb) => 10_240,

            (Self::Premium, Students) => 10_000,
            (Self::Premium, SmsMessages) => 50_000,
            (Self::Premium, EmailMessages) => 200_000,
            (Self::Premium, ReportExports) => 5_000,
            (Self::Premium, StorageMb) => 102_400,
        }
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starter" => Ok(Self::Starter),
            "standard" => Ok(Self::Standard),
            "premium" => Ok(Self::Premium),
            other => Err(format!("unknown plan tier: {}", other)),
        }
    }
}

/// Metered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Student records created
    Students,
    /// Outgoing text messages
    SmsMessages,
    /// Outgoing email
    EmailMessages,
    /// Generated report files
    ReportExports,
    /// Stored attachments, in megabytes
    StorageMb,
}

impl Resource {
    /// Every metered resource
    pub const ALL: [Resource; 5] = [
        Self::Students,
        Self::SmsMessages,
        Self::EmailMessages,
        Self::ReportExports,
        Self::StorageMb,
    ];

    /// Stable label, as used in usage URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::SmsMessages => "sms_messages",
            Self::EmailMessages => "email_messages",
            Self::ReportExports => "report_exports",
            Self::StorageMb => "storage_mb",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown resource: {}", s))
    }
}

/// Calendar month in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// Calendar year (UTC)
    pub year: i32,
    /// Month 1-12 (UTC)
    pub month: u32,
}

impl BillingPeriod {
    /// Period containing `at`
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
