//! Core types for the CoTravel escrow service

use serde::{Deserialize, Serialize};

/// Invoice lifecycle status.
///
/// `draft -> funding` on chain linkage; `funding -> released` on full
/// collection or manual organizer release; `draft|funding -> cancelled`
/// on organizer cancellation. Terminal states have no outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Funding,
    Released,
    Cancelled,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Cancelled)
    }
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Funding => write!(f, "funding"),
            Self::Released => write!(f, "released"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "funding" => Ok(Self::Funding),
            "released" => Ok(Self::Released),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown invoice status: {}", s)),
        }
    }
}

/// A line item on an invoice. Amounts are stroops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount: i64,
    pub recipient_wallet: String,
}

/// A group-funding invoice escrowed on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub organizer_wallet: String,
    pub name: String,
    pub description: Option<String>,
    /// Funding deadline, epoch seconds.
    pub deadline: i64,
    /// Early-withdrawal penalty, percent of the withdrawn amount.
    pub penalty_percent: u32,
    /// Release automatically the moment the invoice is fully collected.
    pub auto_release: bool,
    pub status: InvoiceStatus,
    /// Sum of item amounts, stroops.
    pub total_required: i64,
    /// Sum of active contributions, stroops. Never exceeds total_required.
    pub total_collected: i64,
    /// Bumped on every item change.
    pub version: i64,
    /// Invoice id inside the escrow contract, set on chain linkage.
    pub contract_invoice_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl Invoice {
    /// Unpaid remainder, stroops.
    pub fn remaining(&self) -> i64 {
        self.total_required - self.total_collected
    }

    pub fn is_fully_collected(&self) -> bool {
        self.total_collected == self.total_required
    }
}

/// Contribution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Active,
    Withdrawn,
    Refunded,
}

impl std::fmt::Display for ContributionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Withdrawn => write!(f, "withdrawn"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

impl std::str::FromStr for ContributionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "withdrawn" => Ok(Self::Withdrawn),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("unknown contribution status: {}", s)),
        }
    }
}

/// A participant's stake in an invoice. One row per participant per
/// invoice; the amount is the running active balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub invoice_id: String,
    pub participant_wallet: String,
    pub amount: i64,
    pub status: ContributionStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Kind of a chain transaction recorded against an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Link,
    Contribute,
    Withdraw,
    Release,
    Cancel,
    UpdateRecipients,
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Contribute => write!(f, "contribute"),
            Self::Withdraw => write!(f, "withdraw"),
            Self::Release => write!(f, "release"),
            Self::Cancel => write!(f, "cancel"),
            Self::UpdateRecipients => write!(f, "update_recipients"),
        }
    }
}

impl std::str::FromStr for TxKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(Self::Link),
            "contribute" => Ok(Self::Contribute),
            "withdraw" => Ok(Self::Withdraw),
            "release" => Ok(Self::Release),
            "cancel" => Ok(Self::Cancel),
            "update_recipients" => Ok(Self::UpdateRecipients),
            _ => Err(format!("unknown tx kind: {}", s)),
        }
    }
}

/// Submission/confirmation status of a chain transaction.
/// The ledger reconciles on confirmed receipts only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TxStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown tx status: {}", s)),
        }
    }
}

/// A recorded chain transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    pub invoice_id: String,
    pub wallet: String,
    pub kind: TxKind,
    pub amount: i64,
    pub ledger: Option<u32>,
    pub status: TxStatus,
    pub created_at: i64,
}

/// A pending recipient/item change on a funding invoice awaiting
/// re-consent from all active contributors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modification {
    pub id: String,
    pub invoice_id: String,
    /// Invoice version the change was proposed against.
    pub version: i64,
    pub summary: String,
    pub items: Vec<LineItem>,
    /// Wallets of active contributors that have consented so far.
    pub consented: Vec<String>,
    pub created_at: i64,
}

/// A business listed in the CoTravel directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub owner_wallet: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// A wallet identity known to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub wallet_address: String,
    pub role: Role,
    pub created_at: i64,
}

/// An authenticated session. Created by signature verification, destroyed
/// on expiry or explicit disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub wallet_address: String,
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub role: Role,
}

/// Funding-progress update broadcast to invoice viewers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingProgress {
    pub invoice_id: String,
    pub total_required: i64,
    pub total_collected: i64,
    pub status: InvoiceStatus,
}
