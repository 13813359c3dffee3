//! Plan tiers and the purchasable product catalog.
//!
//! Products carry an explicit [`ProductKind`] so the reset-vs-accumulate
//! decision is a typed property of the catalog entry, never inferred from
//! the product's name.

use serde::{Deserialize, Serialize};

/// Tokens granted to a brand-new account on first touch.
pub const TOKEN_SIGNUP_GRANT: i64 = 200;

/// Days a plan purchase stays valid.
pub const PLAN_VALIDITY_DAYS: i64 = 30;

/// A paid subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidPlan {
    Basic,
    Pro,
    Business,
}

impl PaidPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaidPlan::Basic => "basic",
            PaidPlan::Pro => "pro",
            PaidPlan::Business => "business",
        }
    }

    /// Human-facing plan name used in notifications and emails.
    pub fn display_name(&self) -> &'static str {
        match self {
            PaidPlan::Basic => "Basic",
            PaidPlan::Pro => "Pro",
            PaidPlan::Business => "Business",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(PaidPlan::Basic),
            "pro" => Some(PaidPlan::Pro),
            "business" => Some(PaidPlan::Business),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaidPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any plan tier, including free. Used for display and snapshots; account
/// state itself uses the tagged `PlanState` in the ledger crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Pro,
    Business,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Pro => "pro",
            PlanTier::Business => "business",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanTier::Free),
            "basic" => Some(PlanTier::Basic),
            "pro" => Some(PlanTier::Pro),
            "business" => Some(PlanTier::Business),
            _ => None,
        }
    }

    pub fn paid(&self) -> Option<PaidPlan> {
        match self {
            PlanTier::Free => None,
            PlanTier::Basic => Some(PaidPlan::Basic),
            PlanTier::Pro => Some(PaidPlan::Pro),
            PlanTier::Business => Some(PaidPlan::Business),
        }
    }
}

impl From<PaidPlan> for PlanTier {
    fn from(plan: PaidPlan) -> Self {
        match plan {
            PaidPlan::Basic => PlanTier::Basic,
            PaidPlan::Pro => PlanTier::Pro,
            PaidPlan::Business => PlanTier::Business,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What purchasing a product does to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    /// Sets the plan and *resets* the balance to the allotment.
    PlanTier(PaidPlan),
    /// *Adds* tokens to the current balance; plan state untouched.
    TokenPack,
}

/// A purchasable catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct Product {
    pub key: &'static str,
    pub kind: ProductKind,
    /// Exact charge amount in KRW; verified against the gateway with no
    /// tolerance.
    pub price_krw: i64,
    pub tokens: i64,
}

const CATALOG: &[Product] = &[
    Product {
        key: "basic",
        kind: ProductKind::PlanTier(PaidPlan::Basic),
        price_krw: 22_000,
        tokens: 10_000,
    },
    Product {
        key: "pro",
        kind: ProductKind::PlanTier(PaidPlan::Pro),
        price_krw: 38_000,
        tokens: 18_000,
    },
    Product {
        key: "business",
        kind: ProductKind::PlanTier(PaidPlan::Business),
        price_krw: 50_000,
        tokens: 25_000,
    },
    Product {
        key: "tokens_5000",
        kind: ProductKind::TokenPack,
        price_krw: 5_000,
        tokens: 5_000,
    },
];

impl Product {
    /// Look up a product by its web plan key (`basic`, `tokens_5000`, ...).
    pub fn by_key(key: &str) -> Option<Product> {
        CATALOG.iter().find(|p| p.key == key).copied()
    }

    /// Look up a product by its App Store product id
    /// (`salonpass_basic`, `salonpass_tokens_5000`, ...).
    pub fn by_store_product_id(product_id: &str) -> Option<Product> {
        product_id
            .strip_prefix("salonpass_")
            .and_then(Product::by_key)
    }

    pub fn all() -> &'static [Product] {
        CATALOG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_all_paid_tiers() {
        for plan in [PaidPlan::Basic, PaidPlan::Pro, PaidPlan::Business] {
            let product = Product::by_key(plan.as_str()).unwrap();
            assert_eq!(product.kind, ProductKind::PlanTier(plan));
        }
    }

    #[test]
    fn token_pack_is_not_a_plan() {
        let pack = Product::by_key("tokens_5000").unwrap();
        assert_eq!(pack.kind, ProductKind::TokenPack);
        assert_eq!(pack.tokens, 5_000);
        assert_eq!(pack.price_krw, 5_000);
    }

    #[test]
    fn store_product_ids_map_to_catalog() {
        let product = Product::by_store_product_id("salonpass_pro").unwrap();
        assert_eq!(product.key, "pro");
        assert_eq!(product.tokens, 18_000);
        assert!(Product::by_store_product_id("salonpass_platinum").is_none());
        assert!(Product::by_store_product_id("pro").is_none());
    }

    #[test]
    fn plan_tier_round_trips() {
        for s in ["free", "basic", "pro", "business"] {
            assert_eq!(PlanTier::parse(s).unwrap().as_str(), s);
        }
        assert!(PlanTier::parse("enterprise").is_none());
    }
}
