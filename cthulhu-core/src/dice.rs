//! Call of Cthulhu dice rolling.
//!
//! Supports `NdM[+/-K]` notation (with `d%` as an alias for `d100`),
//! percentile skill checks with success tiers, sanity checks with
//! `pass/fail` loss specs, damage rolls and the resistance table.
//!
//! All randomness flows through a [`RollSource`], so tests can script the
//! exact dice that come up.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum dice in a single expression.
const MAX_DICE: u32 = 100;

/// Maximum sides on a single die.
const MAX_SIDES: u32 = 1000;

/// Roll history kept for statistics.
const MAX_HISTORY: usize = 100;

/// Largest flat modifier or constant accepted in notation.
const MAX_MODIFIER: i64 = 10_000;

/// Rolls considered for the recent average.
const RECENT_WINDOW: usize = 20;

/// Error type for dice parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("Invalid dice count: {0}")]
    InvalidDiceCount(u32),
    #[error("No dice specified")]
    NoDice,
    #[error("Modifier out of range: {0}")]
    ModifierOutOfRange(i64),
    #[error("Invalid sanity loss spec: {0}")]
    InvalidLossSpec(String),
}

// ============================================================================
// Randomness
// ============================================================================

/// Source of individual die results.
pub trait RollSource: Send {
    /// Roll one die with the given number of sides, returning `1..=sides`.
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// Rolls backed by any `rand` RNG.
pub struct RngSource<R: Rng + Send>(R);

impl<R: Rng + Send> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl<R: Rng + Send> RollSource for RngSource<R> {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.0.gen_range(1..=sides.max(1))
    }
}

/// Plays back a fixed list of die results, cycling when exhausted.
///
/// Values are clamped into the die's range, so scripting `90` for a d8
/// yields 8.
#[derive(Debug, Clone)]
pub struct ScriptedRolls {
    rolls: Vec<u32>,
    next: usize,
}

impl ScriptedRolls {
    pub fn new(rolls: impl Into<Vec<u32>>) -> Self {
        Self {
            rolls: rolls.into(),
            next: 0,
        }
    }
}

impl RollSource for ScriptedRolls {
    fn roll_die(&mut self, sides: u32) -> u32 {
        let sides = sides.max(1);
        if self.rolls.is_empty() {
            return 1;
        }
        let value = self.rolls[self.next % self.rolls.len()];
        self.next += 1;
        value.clamp(1, sides)
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// A parsed dice expression such as `2d6+3`, `d%` or a constant `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    /// Number of dice; zero for a constant expression.
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
    pub original: String,
}

impl DiceExpression {
    /// Parse a dice notation string.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let original = notation.trim().to_lowercase();
        let compact: String = original.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(DiceError::NoDice);
        }

        let Some(d_pos) = compact.find('d') else {
            // Constant loss such as the "0" in "0/1d6".
            let value: u64 = compact
                .parse()
                .map_err(|_| DiceError::InvalidNotation(original.clone()))?;
            let modifier = bounded_modifier(i64::try_from(value).unwrap_or(i64::MAX))?;
            return Ok(DiceExpression {
                count: 0,
                sides: 0,
                modifier,
                original,
            });
        };

        let count_str = &compact[..d_pos];
        let rest = &compact[d_pos + 1..];

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(original.clone()))?
        };
        if count == 0 || count > MAX_DICE {
            return Err(DiceError::InvalidDiceCount(count));
        }

        let (sides_str, modifier) = match rest.find(['+', '-']) {
            Some(pos) => {
                let value: u64 = rest[pos + 1..]
                    .parse()
                    .map_err(|_| DiceError::InvalidNotation(original.clone()))?;
                let value = i64::try_from(value).unwrap_or(i64::MAX);
                let signed = if rest[pos..].starts_with('-') { -value } else { value };
                (&rest[..pos], bounded_modifier(signed)?)
            }
            None => (rest, 0),
        };

        let sides: u32 = if sides_str == "%" {
            100
        } else {
            sides_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(original.clone()))?
        };
        if sides == 0 || sides > MAX_SIDES {
            return Err(DiceError::InvalidDieSize(sides));
        }

        Ok(DiceExpression {
            count,
            sides,
            modifier,
            original,
        })
    }

    pub fn is_constant(&self) -> bool {
        self.count == 0
    }

    /// Roll the expression against a source.
    pub fn roll_with(&self, source: &mut dyn RollSource) -> RollResult {
        let rolls: Vec<u32> = (0..self.count).map(|_| source.roll_die(self.sides)).collect();
        let dice_total: i32 = rolls
            .iter()
            .fold(0i32, |acc, &r| acc.saturating_add(r.min(i32::MAX as u32) as i32));
        RollResult {
            expression: self.original.clone(),
            rolls,
            modifier: self.modifier,
            total: dice_total.saturating_add(self.modifier),
        }
    }

    /// Smallest possible total.
    pub fn minimum(&self) -> i32 {
        (self.count.min(i32::MAX as u32) as i32).saturating_add(self.modifier)
    }

    /// Largest possible total.
    pub fn maximum(&self) -> i32 {
        let dice = self.count.saturating_mul(self.sides).min(i32::MAX as u32) as i32;
        dice.saturating_add(self.modifier)
    }
}

fn bounded_modifier(value: i64) -> Result<i32, DiceError> {
    if value.abs() > MAX_MODIFIER {
        return Err(DiceError::ModifierOutOfRange(value));
    }
    // In range, so the conversion cannot fail.
    i32::try_from(value).map_err(|_| DiceError::ModifierOutOfRange(value))
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Result of rolling a dice expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: String,
    pub rolls: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dice = self
            .rolls
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        match self.modifier {
            0 => write!(f, "[{dice}] = {}", self.total),
            m if m > 0 => write!(f, "[{dice}] + {m} = {}", self.total),
            m => write!(f, "[{dice}] - {} = {}", m.abs(), self.total),
        }
    }
}

// ============================================================================
// Skill checks
// ============================================================================

/// Success tiers, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillTier {
    Fumble,
    Failure,
    Success,
    HardSuccess,
    ExtremeSuccess,
    CriticalSuccess,
}

impl SkillTier {
    pub fn is_success(self) -> bool {
        self >= SkillTier::Success
    }

    pub fn label(self) -> &'static str {
        match self {
            SkillTier::Fumble => "fumble",
            SkillTier::Failure => "failure",
            SkillTier::Success => "success",
            SkillTier::HardSuccess => "hard success",
            SkillTier::ExtremeSuccess => "extreme success",
            SkillTier::CriticalSuccess => "critical success",
        }
    }
}

impl fmt::Display for SkillTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tier a percentile roll against a target value.
///
/// 01 is always a critical and 100 always a fumble. Rolls of 96+ fumble
/// when the target is below 50.
pub fn tier_for(roll: u32, target: i32) -> SkillTier {
    let roll = roll as i32;
    if roll >= 100 {
        return SkillTier::Fumble;
    }
    if roll <= 1 {
        return SkillTier::CriticalSuccess;
    }
    if roll <= target / 5 {
        SkillTier::ExtremeSuccess
    } else if roll <= target / 2 {
        SkillTier::HardSuccess
    } else if roll <= target {
        SkillTier::Success
    } else if target < 50 && roll >= 96 {
        SkillTier::Fumble
    } else {
        SkillTier::Failure
    }
}

/// Outcome of a percentile check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCheck {
    pub roll: u32,
    pub skill_value: i32,
    pub modifier: i32,
    /// `skill_value + modifier`, the number the roll was compared against.
    pub target: i32,
    pub tier: SkillTier,
}

impl SkillCheck {
    pub fn is_success(&self) -> bool {
        self.tier.is_success()
    }
}

impl fmt::Display for SkillCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}: {}", self.roll, self.target, self.tier)
    }
}

// ============================================================================
// Sanity
// ============================================================================

/// A `pass/fail` sanity-loss spec such as `1d4/1d8` or `0/1d6`.
///
/// A single expression applies to both outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityLoss {
    pub on_success: DiceExpression,
    pub on_failure: DiceExpression,
}

impl SanityLoss {
    pub fn parse(spec: &str) -> Result<Self, DiceError> {
        let invalid = |_| DiceError::InvalidLossSpec(spec.to_string());
        match spec.split_once('/') {
            Some((pass, fail)) => Ok(Self {
                on_success: DiceExpression::parse(pass).map_err(invalid)?,
                on_failure: DiceExpression::parse(fail).map_err(invalid)?,
            }),
            None => {
                let expr = DiceExpression::parse(spec).map_err(invalid)?;
                Ok(Self {
                    on_success: expr.clone(),
                    on_failure: expr,
                })
            }
        }
    }
}

impl FromStr for SanityLoss {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SanityLoss::parse(s)
    }
}

impl fmt::Display for SanityLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.on_success, self.on_failure)
    }
}

/// Sanity lost in one roll that triggers temporary insanity.
pub const TEMPORARY_INSANITY_THRESHOLD: i32 = 5;

/// Outcome of a sanity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityCheck {
    pub check: SkillCheck,
    pub loss_roll: RollResult,
    /// Sanity actually removed after clamping.
    pub loss: i32,
    pub previous: i32,
    pub current: i32,
    pub maximum: i32,
    pub temporary_insanity: bool,
    /// Sanity reached zero.
    pub permanent_insanity: bool,
}

impl SanityCheck {
    pub fn madness_triggered(&self) -> bool {
        self.temporary_insanity || self.permanent_insanity
    }
}

// ============================================================================
// Damage
// ============================================================================

/// Where a blow landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitLocation {
    Head,
    Chest,
    Abdomen,
    Arms,
    Legs,
}

impl HitLocation {
    pub fn damage_modifier(self) -> i32 {
        match self {
            HitLocation::Head => 2,
            HitLocation::Chest => 1,
            HitLocation::Abdomen | HitLocation::Arms | HitLocation::Legs => 0,
        }
    }
}

/// Outcome of an opposed characteristic roll on the resistance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResistanceCheck {
    pub active: i32,
    pub passive: i32,
    pub chance: i32,
    pub roll: u32,
    pub success: bool,
}

/// Success chance for an active value against a passive one.
pub fn resistance_chance(active: i32, passive: i32) -> i32 {
    if passive <= 0 {
        return 95;
    }
    let ratio = active as f64 / passive as f64;
    if ratio >= 2.0 {
        95
    } else if ratio >= 1.5 {
        80
    } else if ratio >= 1.0 {
        50
    } else if ratio >= 0.5 {
        20
    } else {
        5
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum RollKind {
    Expression,
    Check { success: bool },
}

#[derive(Debug, Clone, Copy)]
struct RollRecord {
    total: i32,
    kind: RollKind,
}

/// Summary of recent dice activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiceStatistics {
    pub total_rolls: usize,
    /// Mean total over the most recent rolls.
    pub recent_average: f64,
    pub checks: usize,
    /// Fraction of checks that succeeded.
    pub success_rate: f64,
}

/// Dice roller with an injectable source and bounded history.
pub struct DiceEngine {
    source: Box<dyn RollSource>,
    history: VecDeque<RollRecord>,
}

impl fmt::Debug for DiceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiceEngine")
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl Default for DiceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiceEngine {
    /// Engine seeded from system entropy.
    pub fn new() -> Self {
        Self::with_source(RngSource::new(StdRng::from_entropy()))
    }

    /// Deterministic engine for reproducible sessions.
    pub fn seeded(seed: u64) -> Self {
        Self::with_source(RngSource::new(StdRng::seed_from_u64(seed)))
    }

    /// Engine that plays back the given die results.
    pub fn scripted(rolls: impl Into<Vec<u32>>) -> Self {
        Self::with_source(ScriptedRolls::new(rolls))
    }

    pub fn with_source(source: impl RollSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            history: VecDeque::new(),
        }
    }

    fn record(&mut self, total: i32, kind: RollKind) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(RollRecord { total, kind });
    }

    /// Roll a dice expression.
    pub fn roll(&mut self, expression: &str) -> Result<RollResult, DiceError> {
        let expr = DiceExpression::parse(expression)?;
        Ok(self.roll_expression(&expr))
    }

    pub fn roll_expression(&mut self, expr: &DiceExpression) -> RollResult {
        let result = expr.roll_with(self.source.as_mut());
        self.record(result.total, RollKind::Expression);
        result
    }

    /// Roll a single percentile die.
    pub fn d100(&mut self) -> u32 {
        self.source.roll_die(100)
    }

    /// Percentile check against `skill_value + modifier`.
    pub fn skill_check(&mut self, skill_value: i32, modifier: i32) -> SkillCheck {
        let roll = self.d100();
        let target = skill_value.saturating_add(modifier);
        let tier = tier_for(roll, target);
        self.record(
            roll as i32,
            RollKind::Check {
                success: tier.is_success(),
            },
        );
        tracing::debug!(roll, target, tier = %tier, "Skill check");
        SkillCheck {
            roll,
            skill_value,
            modifier,
            target,
            tier,
        }
    }

    pub fn luck_check(&mut self, luck: i32) -> SkillCheck {
        self.skill_check(luck, 0)
    }

    /// Roll against current sanity and apply the matching loss.
    ///
    /// The result is clamped into `[0, maximum]`.
    pub fn sanity_check(
        &mut self,
        current: i32,
        maximum: i32,
        loss_spec: &str,
    ) -> Result<SanityCheck, DiceError> {
        let loss = SanityLoss::parse(loss_spec)?;
        Ok(self.sanity_check_with(current, maximum, &loss))
    }

    pub fn sanity_check_with(&mut self, current: i32, maximum: i32, loss: &SanityLoss) -> SanityCheck {
        let maximum = maximum.max(0);
        let previous = current.clamp(0, maximum);
        let check = self.skill_check(previous, 0);

        let expr = if check.is_success() {
            &loss.on_success
        } else {
            &loss.on_failure
        };
        let loss_roll = self.roll_expression(expr);
        let new_value = (previous - loss_roll.total.max(0)).clamp(0, maximum);
        let lost = previous - new_value;

        let result = SanityCheck {
            check,
            loss_roll,
            loss: lost,
            previous,
            current: new_value,
            maximum,
            temporary_insanity: lost >= TEMPORARY_INSANITY_THRESHOLD,
            permanent_insanity: new_value == 0 && previous > 0,
        };
        tracing::debug!(
            previous,
            current = new_value,
            loss = lost,
            spec = %loss,
            "Sanity check"
        );
        result
    }

    /// Evaluate a damage expression; negative totals become zero.
    pub fn damage_roll(&mut self, expression: &str) -> Result<u32, DiceError> {
        let result = self.roll(expression)?;
        Ok(result.total.max(0) as u32)
    }

    /// Damage with the hit-location modifier applied.
    pub fn damage_roll_at(&mut self, expression: &str, location: HitLocation) -> Result<u32, DiceError> {
        let result = self.roll(expression)?;
        Ok((result.total + location.damage_modifier()).max(0) as u32)
    }

    pub fn resistance_check(&mut self, active: i32, passive: i32) -> ResistanceCheck {
        let chance = resistance_chance(active, passive);
        let roll = self.d100();
        let success = roll as i32 <= chance;
        self.record(roll as i32, RollKind::Check { success });
        ResistanceCheck {
            active,
            passive,
            chance,
            roll,
            success,
        }
    }

    pub fn statistics(&self) -> DiceStatistics {
        let recent: Vec<i32> = self
            .history
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .map(|r| r.total)
            .collect();
        let recent_average = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|&t| t as f64).sum::<f64>() / recent.len() as f64
        };

        let checks: Vec<bool> = self
            .history
            .iter()
            .filter_map(|r| match r.kind {
                RollKind::Check { success } => Some(success),
                RollKind::Expression => None,
            })
            .collect();
        let success_rate = if checks.is_empty() {
            0.0
        } else {
            checks.iter().filter(|&&s| s).count() as f64 / checks.len() as f64
        };

        DiceStatistics {
            total_rolls: self.history.len(),
            recent_average,
            checks: checks.len(),
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let expr = DiceExpression::parse("2d6+3").unwrap();
        assert_eq!((expr.count, expr.sides, expr.modifier), (2, 6, 3));

        let expr = DiceExpression::parse("d100").unwrap();
        assert_eq!((expr.count, expr.sides, expr.modifier), (1, 100, 0));

        let expr = DiceExpression::parse("1D8 - 1").unwrap();
        assert_eq!((expr.count, expr.sides, expr.modifier), (1, 8, -1));
    }

    #[test]
    fn test_parse_percent_and_constant() {
        assert_eq!(DiceExpression::parse("d%").unwrap().sides, 100);

        let zero = DiceExpression::parse("0").unwrap();
        assert!(zero.is_constant());
        assert_eq!(zero.maximum(), 0);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(DiceExpression::parse(""), Err(DiceError::NoDice));
        assert!(matches!(
            DiceExpression::parse("banana"),
            Err(DiceError::InvalidNotation(_))
        ));
        assert_eq!(DiceExpression::parse("2d0"), Err(DiceError::InvalidDieSize(0)));
        assert_eq!(DiceExpression::parse("1d1001"), Err(DiceError::InvalidDieSize(1001)));
        assert_eq!(DiceExpression::parse("101d6"), Err(DiceError::InvalidDiceCount(101)));
        assert!(DiceExpression::parse("2d6+").is_err());
    }

    #[test]
    fn test_roll_range() {
        let mut dice = DiceEngine::seeded(7);
        for _ in 0..200 {
            let result = dice.roll("2d6+3").unwrap();
            assert!((5..=15).contains(&result.total));
            assert_eq!(result.rolls.len(), 2);
        }
    }

    #[test]
    fn test_scripted_rolls_clamp() {
        let mut dice = DiceEngine::scripted(vec![90, 3]);
        let result = dice.roll("1d8").unwrap();
        assert_eq!(result.total, 8);
        let result = dice.roll("1d8").unwrap();
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_tier_breakpoints() {
        assert_eq!(tier_for(1, 50), SkillTier::CriticalSuccess);
        assert_eq!(tier_for(10, 50), SkillTier::ExtremeSuccess);
        assert_eq!(tier_for(20, 50), SkillTier::HardSuccess);
        assert_eq!(tier_for(25, 50), SkillTier::HardSuccess);
        assert_eq!(tier_for(26, 50), SkillTier::Success);
        assert_eq!(tier_for(50, 50), SkillTier::Success);
        assert_eq!(tier_for(51, 50), SkillTier::Failure);
        assert_eq!(tier_for(99, 50), SkillTier::Failure);
        assert_eq!(tier_for(100, 50), SkillTier::Fumble);
    }

    #[test]
    fn test_fumble_range_for_low_skill() {
        assert_eq!(tier_for(95, 40), SkillTier::Failure);
        assert_eq!(tier_for(96, 40), SkillTier::Fumble);
        assert_eq!(tier_for(96, 60), SkillTier::Failure);
        assert_eq!(tier_for(100, 99), SkillTier::Fumble);
    }

    #[test]
    fn test_tiering_is_pure() {
        for value in [0, 15, 49, 50, 75, 99] {
            for roll in 1..=100 {
                assert_eq!(tier_for(roll, value), tier_for(roll, value));
            }
        }
    }

    #[test]
    fn test_tier_ordering() {
        assert!(SkillTier::Fumble < SkillTier::Failure);
        assert!(SkillTier::Failure < SkillTier::Success);
        assert!(SkillTier::HardSuccess < SkillTier::ExtremeSuccess);
        assert!(SkillTier::ExtremeSuccess < SkillTier::CriticalSuccess);
        assert!(!SkillTier::Failure.is_success());
        assert!(SkillTier::Success.is_success());
    }

    #[test]
    fn test_skill_check_applies_modifier() {
        let mut dice = DiceEngine::scripted(vec![55]);
        let check = dice.skill_check(50, 10);
        assert_eq!(check.target, 60);
        assert_eq!(check.tier, SkillTier::Success);
    }

    #[test]
    fn test_huge_modifier_is_rejected() {
        let mut dice = DiceEngine::seeded(1);
        assert_eq!(
            dice.roll("1d6+2147483647"),
            Err(DiceError::ModifierOutOfRange(2147483647))
        );
        assert!(matches!(
            DiceExpression::parse("1d6-99999999999"),
            Err(DiceError::ModifierOutOfRange(_))
        ));
        assert!(matches!(
            DiceExpression::parse("4294967296"),
            Err(DiceError::ModifierOutOfRange(_))
        ));
        assert_eq!(DiceExpression::parse("1d6+10000").unwrap().modifier, 10_000);
    }

    #[test]
    fn test_oversized_expression_saturates() {
        let expr = DiceExpression {
            count: 1,
            sides: 6,
            modifier: i32::MAX,
            original: "1d6+max".into(),
        };
        let result = expr.roll_with(&mut ScriptedRolls::new(vec![6]));
        assert_eq!(result.total, i32::MAX);
        assert_eq!(expr.maximum(), i32::MAX);
    }

    #[test]
    fn test_skill_check_target_saturates() {
        let mut dice = DiceEngine::scripted(vec![50]);
        let check = dice.skill_check(i32::MAX, 10);
        assert_eq!(check.target, i32::MAX);
        assert!(check.tier.is_success());

        let check = dice.skill_check(i32::MIN, -10);
        assert_eq!(check.target, i32::MIN);
        assert_eq!(check.tier, SkillTier::Failure);
    }

    #[test]
    fn test_sanity_loss_spec() {
        let loss = SanityLoss::parse("1d4/1d8").unwrap();
        assert_eq!(loss.on_success.sides, 4);
        assert_eq!(loss.on_failure.sides, 8);

        let loss = SanityLoss::parse("0/1d6").unwrap();
        assert!(loss.on_success.is_constant());

        let single = SanityLoss::parse("1d3").unwrap();
        assert_eq!(single.on_success, single.on_failure);

        assert!(matches!(
            SanityLoss::parse("1d4/banana"),
            Err(DiceError::InvalidLossSpec(_))
        ));
    }

    #[test]
    fn test_sanity_check_range() {
        let mut dice = DiceEngine::seeded(42);
        for _ in 0..200 {
            let result = dice.sanity_check(60, 99, "1d4/1d8").unwrap();
            assert!((52..=60).contains(&result.current), "got {}", result.current);
            assert_eq!(result.previous - result.current, result.loss);
        }
    }

    #[test]
    fn test_sanity_check_failure_uses_fail_loss() {
        // 90 fails against 10; the d8 then rolls 8.
        let mut dice = DiceEngine::scripted(vec![90, 8]);
        let result = dice.sanity_check(10, 99, "1d4/1d8").unwrap();
        assert!(!result.check.is_success());
        assert_eq!(result.current, 2);
        assert!(result.temporary_insanity);
        assert!(!result.permanent_insanity);
    }

    #[test]
    fn test_sanity_check_success_uses_pass_loss() {
        let mut dice = DiceEngine::scripted(vec![5, 4]);
        let result = dice.sanity_check(60, 99, "1d4/1d8").unwrap();
        assert!(result.check.is_success());
        assert_eq!(result.loss, 4);
        assert!(!result.madness_triggered());
    }

    #[test]
    fn test_sanity_never_negative() {
        let mut dice = DiceEngine::scripted(vec![99, 10]);
        let result = dice.sanity_check(3, 99, "1d10").unwrap();
        assert_eq!(result.current, 0);
        assert_eq!(result.loss, 3);
        assert!(result.permanent_insanity);
    }

    #[test]
    fn test_damage_roll_non_negative() {
        let mut dice = DiceEngine::scripted(vec![1]);
        assert_eq!(dice.damage_roll("1d4-3").unwrap(), 0);
        assert!(dice.damage_roll("nonsense").is_err());
    }

    #[test]
    fn test_damage_hit_location() {
        let mut dice = DiceEngine::scripted(vec![3]);
        assert_eq!(dice.damage_roll_at("1d6", HitLocation::Head).unwrap(), 5);
        assert_eq!(dice.damage_roll_at("1d6", HitLocation::Chest).unwrap(), 4);
        assert_eq!(dice.damage_roll_at("1d6", HitLocation::Legs).unwrap(), 3);
    }

    #[test]
    fn test_resistance_table() {
        assert_eq!(resistance_chance(100, 50), 95);
        assert_eq!(resistance_chance(75, 50), 80);
        assert_eq!(resistance_chance(50, 50), 50);
        assert_eq!(resistance_chance(30, 50), 20);
        assert_eq!(resistance_chance(10, 50), 5);

        let mut dice = DiceEngine::scripted(vec![45]);
        assert!(dice.resistance_check(50, 50).success);
    }

    #[test]
    fn test_statistics() {
        let mut dice = DiceEngine::scripted(vec![10, 90]);
        dice.skill_check(50, 0);
        dice.skill_check(50, 0);
        let stats = dice.statistics();
        assert_eq!(stats.total_rolls, 2);
        assert_eq!(stats.checks, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.recent_average - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut dice = DiceEngine::seeded(1);
        for _ in 0..150 {
            dice.roll("1d6").unwrap();
        }
        assert_eq!(dice.statistics().total_rolls, MAX_HISTORY);
    }
}
