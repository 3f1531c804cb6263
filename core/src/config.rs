use crate::{
    catalog::ActionType,
    types::{Cents, Points},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Action catalog ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPointsConfig {
    pub action: ActionType,
    pub points: Points,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionCatalogFile {
    actions: Vec<ActionPointsConfig>,
}

// ── Progression ("the chase") ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressionConfig {
    /// Rank thresholds are multiples of this.
    pub rank_step: Points,
    /// Distance to the first target. Must be below `rank_step`.
    pub initial_gap: Points,
    /// Added to the gap after every catch.
    pub gap_increment: Points,
    /// Upper bound on the gap.
    pub max_gap: Points,
}

// ── Referral payouts ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralConfig {
    /// Commission in basis points of the payment amount.
    pub commission_bps: i64,
    /// Commission when the upstream event carries no amount.
    pub flat_commission_cents: Cents,
    pub code_length: usize,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub action_points: HashMap<ActionType, Points>,
    pub progression:   ProgressionConfig,
    pub referral:      ReferralConfig,
}

impl LedgerConfig {
    /// Load from the data/ directory.
    /// In tests, use LedgerConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let catalog_path = format!("{data_dir}/catalog/action_catalog.json");
        let catalog_content = std::fs::read_to_string(&catalog_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {catalog_path}: {e}"))?;
        let catalog_file: ActionCatalogFile = serde_json::from_str(&catalog_content)?;
        let action_points = catalog_file
            .actions
            .into_iter()
            .map(|a| (a.action, a.points))
            .collect();

        let progression_path = format!("{data_dir}/progression/progression_config.json");
        let progression_content = std::fs::read_to_string(&progression_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {progression_path}: {e}"))?;
        let progression: ProgressionConfig = serde_json::from_str(&progression_content)?;

        let referral_path = format!("{data_dir}/referral/referral_config.json");
        let referral_content = std::fs::read_to_string(&referral_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {referral_path}: {e}"))?;
        let referral: ReferralConfig = serde_json::from_str(&referral_content)?;

        let config = Self { action_points, progression, referral };
        config.validate()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let action_points = [
            (ActionType::ShareFacebook, 100),
            (ActionType::ShareX, 100),
            (ActionType::ShareInstagram, 100),
            (ActionType::ContestJoin, 200),
            (ActionType::Purchase, 500),
            (ActionType::SignupBonus, 100),
            (ActionType::ReferralPayout, 0),
            (ActionType::ProgressionBonus, 50),
            (ActionType::CompositeBonus, 1000),
        ]
        .into();

        Self {
            action_points,
            progression: ProgressionConfig {
                rank_step:     1000,
                initial_gap:   250,
                gap_increment: 50,
                max_gap:       500,
            },
            referral: ReferralConfig {
                commission_bps:        2000,
                flat_commission_cents: 200,
                code_length:           8,
            },
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for action in ActionType::ALL {
            match self.action_points.get(&action) {
                None => anyhow::bail!("action catalog is missing '{action}'"),
                Some(p) if *p < 0 => anyhow::bail!("'{action}' has negative points ({p})"),
                Some(_) => {}
            }
        }

        let p = &self.progression;
        if p.rank_step <= 0 {
            anyhow::bail!("rank_step must be positive, got {}", p.rank_step);
        }
        if p.initial_gap <= 0 || p.initial_gap >= p.rank_step {
            anyhow::bail!(
                "initial_gap must be in (0, rank_step={}), got {}",
                p.rank_step,
                p.initial_gap
            );
        }
        if p.gap_increment < 0 || p.max_gap < p.initial_gap {
            anyhow::bail!(
                "gap_increment must be >= 0 and max_gap >= initial_gap (got {}, {})",
                p.gap_increment,
                p.max_gap
            );
        }

        let r = &self.referral;
        if !(0..=10_000).contains(&r.commission_bps) || r.flat_commission_cents < 0 {
            anyhow::bail!("referral commission out of range");
        }
        if r.code_length < 6 {
            anyhow::bail!("referral code_length must be >= 6, got {}", r.code_length);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_test_config_is_valid() {
        LedgerConfig::default_test().validate().unwrap();
    }

    #[test]
    fn gap_at_or_above_rank_step_is_rejected() {
        let mut config = LedgerConfig::default_test();
        config.progression.initial_gap = config.progression.rank_step;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_catalog_entry_is_rejected() {
        let mut config = LedgerConfig::default_test();
        config.action_points.remove(&ActionType::CompositeBonus);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bundled_data_dir_loads() {
        let data_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");
        let config = LedgerConfig::load(data_dir).unwrap();
        assert_eq!(config.action_points[&ActionType::Purchase], 500);
        assert_eq!(config.progression, LedgerConfig::default_test().progression);
    }
}
