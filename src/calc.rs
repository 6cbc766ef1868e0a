//! Calculation engine
//!
//! Deterministic execution layer: the reasoning service is not allowed here.
//! Every invocation resolves its operands against the ledger, validates unit
//! and period compatibility, and emits one trace step per arithmetic
//! operation, each step carrying the provenance of every operand. Mismatches
//! fail closed with a typed [`FormulaError`]; no value is ever coerced and no
//! NaN ever leaves this module.

use crate::error::FormulaError;
use crate::ledger::EvidenceLedger;
use crate::models::{CalculationTrace, FormulaId, Operand, Provenance, TraceStep, Unit};
use crate::period::Period;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Engine-level operand binding: a reference into the ledger by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperandBinding {
    pub role: String,
    pub source: OperandRef,
}

impl OperandBinding {
    pub fn evidence(role: impl Into<String>, id: Uuid) -> Self {
        Self {
            role: role.into(),
            source: OperandRef::Evidence(id),
        }
    }

    pub fn trace(role: impl Into<String>, id: Uuid) -> Self {
        Self {
            role: role.into(),
            source: OperandRef::Trace(id),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperandRef {
    Evidence(Uuid),
    Trace(Uuid),
}

/// Operand resolved from the ledger, with everything the compatibility
/// checks need.
#[derive(Debug, Clone)]
struct Resolved {
    role: String,
    value: f64,
    unit: Unit,
    period: Option<Period>,
    metric: Option<String>,
    provenance: Provenance,
}

type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Stateless formula registry. `compute` is deterministic: identical
/// bindings against an identical ledger produce a bit-identical trace,
/// including its id.
#[derive(Debug, Default)]
pub struct CalculationEngine;

impl CalculationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        formula: FormulaId,
        bindings: &[OperandBinding],
        ledger: &EvidenceLedger,
    ) -> FormulaResult<CalculationTrace> {
        debug!(formula = %formula, operand_count = bindings.len(), "Computing formula");

        let (steps, result, unit) = match formula {
            FormulaId::PercentageChange => {
                let old = self.resolve(self.require(bindings, "old")?, ledger)?;
                let new = self.resolve(self.require(bindings, "new")?, ledger)?;
                percentage_change_steps(&old, &new)?
            }
            FormulaId::GrowthRateYoy => self.growth_rate(bindings, ledger, GrowthBasis::Yoy)?,
            FormulaId::GrowthRateQoq => self.growth_rate(bindings, ledger, GrowthBasis::Qoq)?,
            FormulaId::Roe => self.ratio(bindings, ledger, "net_income", "shareholders_equity")?,
            FormulaId::Roa => self.ratio(bindings, ledger, "net_income", "total_assets")?,
            FormulaId::LoanToDeposit => {
                self.ratio(bindings, ledger, "total_loans", "total_deposits")?
            }
            FormulaId::NetInterestMargin => {
                self.ratio(bindings, ledger, "net_interest_income", "average_earning_assets")?
            }
            FormulaId::CostToIncome => {
                self.ratio(bindings, ledger, "operating_expenses", "operating_income")?
            }
            FormulaId::Sum => self.fold(bindings, ledger, false)?,
            FormulaId::Average => self.fold(bindings, ledger, true)?,
            FormulaId::CompoundGrowth => self.compound_growth(bindings, ledger)?,
        };

        debug_assert!(result.is_finite());

        Ok(CalculationTrace {
            id: trace_id(formula, bindings),
            formula,
            steps,
            result,
            unit,
        })
    }

    fn require<'a>(
        &self,
        bindings: &'a [OperandBinding],
        role: &str,
    ) -> FormulaResult<&'a OperandBinding> {
        bindings
            .iter()
            .find(|b| b.role == role)
            .ok_or_else(|| FormulaError::MissingOperand(format!("no binding for role {:?}", role)))
    }

    fn resolve(&self, binding: &OperandBinding, ledger: &EvidenceLedger) -> FormulaResult<Resolved> {
        match binding.source {
            OperandRef::Evidence(id) => {
                let item = ledger.evidence(id).ok_or_else(|| {
                    FormulaError::MissingOperand(format!(
                        "evidence {} for role {:?} not in ledger",
                        id, binding.role
                    ))
                })?;
                Ok(Resolved {
                    role: binding.role.clone(),
                    value: item.value,
                    unit: item.unit,
                    period: Some(item.period),
                    metric: Some(item.metric.clone()),
                    provenance: Provenance::Evidence(id),
                })
            }
            OperandRef::Trace(id) => {
                let trace = ledger.trace(id).ok_or_else(|| {
                    FormulaError::MissingOperand(format!(
                        "trace {} for role {:?} not in ledger",
                        id, binding.role
                    ))
                })?;
                Ok(Resolved {
                    role: binding.role.clone(),
                    value: trace.result,
                    unit: trace.unit,
                    period: None,
                    metric: None,
                    provenance: Provenance::Trace(id),
                })
            }
        }
    }

    /// `numerator / denominator × 100` with same-period, same-unit checks.
    fn ratio(
        &self,
        bindings: &[OperandBinding],
        ledger: &EvidenceLedger,
        num_role: &str,
        den_role: &str,
    ) -> FormulaResult<(Vec<TraceStep>, f64, Unit)> {
        let num = self.resolve(self.require(bindings, num_role)?, ledger)?;
        let den = self.resolve(self.require(bindings, den_role)?, ledger)?;

        check_same_unit(&num, &den)?;
        check_same_period(&num, &den)?;
        if den.value == 0.0 {
            return Err(FormulaError::DivisionByZero(format!(
                "{} is zero",
                den_role
            )));
        }

        let ratio = num.value / den.value;
        let percent = ratio * 100.0;

        let steps = vec![
            TraceStep {
                description: format!("{} / {}", num_role, den_role),
                operands: vec![operand(&num), operand(&den)],
                value: ratio,
            },
            TraceStep {
                description: "scale to percent (×100)".to_string(),
                operands: vec![Operand {
                    value: ratio,
                    provenance: Provenance::Step(0),
                }],
                value: percent,
            },
        ];

        Ok((steps, percent, Unit::Percent))
    }

    /// Growth rate of one evidence operand against its period-matched prior
    /// value, resolved from the ledger via the period model.
    fn growth_rate(
        &self,
        bindings: &[OperandBinding],
        ledger: &EvidenceLedger,
        basis: GrowthBasis,
    ) -> FormulaResult<(Vec<TraceStep>, f64, Unit)> {
        let current = self.resolve(self.require(bindings, "current")?, ledger)?;

        let (metric, period) = match (&current.metric, current.period) {
            (Some(m), Some(p)) => (m.clone(), p),
            _ => {
                return Err(FormulaError::InvalidOperands(
                    "growth rate requires an evidence operand with a period".to_string(),
                ))
            }
        };

        let prior_period = match basis {
            GrowthBasis::Yoy => period.prior_year(),
            GrowthBasis::Qoq => period.prior_quarter().map_err(|_| {
                FormulaError::IncompatiblePeriods(format!(
                    "QoQ growth is undefined for {}",
                    period
                ))
            })?,
        };

        let prior_item = ledger.find(&metric, prior_period).ok_or_else(|| {
            FormulaError::MissingOperand(format!(
                "no {} evidence for comparison period {}",
                metric, prior_period
            ))
        })?;

        let prior = Resolved {
            role: "prior".to_string(),
            value: prior_item.value,
            unit: prior_item.unit,
            period: Some(prior_item.period),
            metric: Some(prior_item.metric.clone()),
            provenance: Provenance::Evidence(prior_item.id),
        };

        percentage_change_steps(&prior, &current)
    }

    /// Ordered fold over the operand list; one step per addition, plus a
    /// final division for the average.
    fn fold(
        &self,
        bindings: &[OperandBinding],
        ledger: &EvidenceLedger,
        average: bool,
    ) -> FormulaResult<(Vec<TraceStep>, f64, Unit)> {
        if bindings.is_empty() {
            return Err(FormulaError::MissingOperand(
                "sum/average requires at least one operand".to_string(),
            ));
        }

        let resolved: Vec<Resolved> = bindings
            .iter()
            .map(|b| self.resolve(b, ledger))
            .collect::<FormulaResult<_>>()?;

        let unit = resolved[0].unit;
        for r in &resolved[1..] {
            if r.unit != unit {
                return Err(FormulaError::IncompatibleUnits(format!(
                    "operand {:?} is {:?}, expected {:?}",
                    r.role, r.unit, unit
                )));
            }
        }

        let mut steps = Vec::new();
        let mut total = resolved[0].value;

        if resolved.len() == 1 {
            steps.push(TraceStep {
                description: "total of single operand".to_string(),
                operands: vec![operand(&resolved[0])],
                value: total,
            });
        } else {
            for (i, r) in resolved[1..].iter().enumerate() {
                let acc_provenance = if i == 0 {
                    operand(&resolved[0])
                } else {
                    Operand {
                        value: total,
                        provenance: Provenance::Step(i - 1),
                    }
                };
                total += r.value;
                steps.push(TraceStep {
                    description: format!("running total after {:?}", r.role),
                    operands: vec![acc_provenance, operand(r)],
                    value: total,
                });
            }
        }

        if average {
            let n = resolved.len() as f64;
            let mean = total / n;
            steps.push(TraceStep {
                description: format!("divide total by operand count ({})", resolved.len()),
                operands: vec![Operand {
                    value: total,
                    provenance: Provenance::Step(steps.len() - 1),
                }],
                value: mean,
            });
            Ok((steps, mean, unit))
        } else {
            Ok((steps, total, unit))
        }
    }

    /// CAGR: `(end / start)^(1/n) - 1` with `n` counted by the period model.
    fn compound_growth(
        &self,
        bindings: &[OperandBinding],
        ledger: &EvidenceLedger,
    ) -> FormulaResult<(Vec<TraceStep>, f64, Unit)> {
        let start = self.resolve(self.require(bindings, "start")?, ledger)?;
        let end = self.resolve(self.require(bindings, "end")?, ledger)?;

        check_same_unit(&start, &end)?;

        let (start_period, end_period) = match (start.period, end.period) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(FormulaError::InvalidOperands(
                    "compound growth requires period-tagged evidence operands".to_string(),
                ))
            }
        };

        let n = start_period.periods_until(&end_period).map_err(|_| {
            FormulaError::IncompatiblePeriods(format!(
                "cannot count periods between {} and {}",
                start_period, end_period
            ))
        })?;

        if n <= 0 {
            return Err(FormulaError::InvalidOperands(format!(
                "non-positive period count {} between {} and {}",
                n, start_period, end_period
            )));
        }
        if start.value <= 0.0 {
            return Err(FormulaError::InvalidOperands(format!(
                "start value {} must be positive",
                start.value
            )));
        }

        let ratio = end.value / start.value;
        let annualized = ratio.powf(1.0 / n as f64);
        let rate = annualized - 1.0;

        let steps = vec![
            TraceStep {
                description: "growth ratio: end / start".to_string(),
                operands: vec![operand(&end), operand(&start)],
                value: ratio,
            },
            TraceStep {
                description: format!("per-period ratio: ^(1/{})", n),
                operands: vec![Operand {
                    value: ratio,
                    provenance: Provenance::Step(0),
                }],
                value: annualized,
            },
            TraceStep {
                description: "subtract 1".to_string(),
                operands: vec![Operand {
                    value: annualized,
                    provenance: Provenance::Step(1),
                }],
                value: rate,
            },
        ];

        Ok((steps, rate, Unit::Ratio))
    }
}

#[derive(Debug, Clone, Copy)]
enum GrowthBasis {
    Yoy,
    Qoq,
}

/// `(new - old) / old × 100`, one step per operation.
fn percentage_change_steps(
    old: &Resolved,
    new: &Resolved,
) -> FormulaResult<(Vec<TraceStep>, f64, Unit)> {
    check_same_unit(old, new)?;
    if old.value == 0.0 {
        return Err(FormulaError::DivisionByZero(
            "old value is zero".to_string(),
        ));
    }

    let change = new.value - old.value;
    let relative = change / old.value;
    let percent = relative * 100.0;

    let steps = vec![
        TraceStep {
            description: "change: new - old".to_string(),
            operands: vec![operand(new), operand(old)],
            value: change,
        },
        TraceStep {
            description: "relative change: change / old".to_string(),
            operands: vec![
                Operand {
                    value: change,
                    provenance: Provenance::Step(0),
                },
                operand(old),
            ],
            value: relative,
        },
        TraceStep {
            description: "scale to percent (×100)".to_string(),
            operands: vec![Operand {
                value: relative,
                provenance: Provenance::Step(1),
            }],
            value: percent,
        },
    ];

    Ok((steps, percent, Unit::Percent))
}

fn operand(r: &Resolved) -> Operand {
    Operand {
        value: r.value,
        provenance: r.provenance,
    }
}

fn check_same_unit(a: &Resolved, b: &Resolved) -> FormulaResult<()> {
    if a.unit != b.unit {
        return Err(FormulaError::IncompatibleUnits(format!(
            "{:?} is {:?} but {:?} is {:?}",
            a.role, a.unit, b.role, b.unit
        )));
    }
    Ok(())
}

fn check_same_period(a: &Resolved, b: &Resolved) -> FormulaResult<()> {
    if let (Some(pa), Some(pb)) = (a.period, b.period) {
        if pa != pb {
            return Err(FormulaError::IncompatiblePeriods(format!(
                "{:?} is from {} but {:?} is from {}",
                a.role, pa, b.role, pb
            )));
        }
    }
    Ok(())
}

/// Deterministic trace id: a digest of the formula and its bindings, so the
/// same invocation always yields the same trace identity.
fn trace_id(formula: FormulaId, bindings: &[OperandBinding]) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(formula.as_str().as_bytes());
    for binding in bindings {
        hasher.update(binding.role.as_bytes());
        match binding.source {
            OperandRef::Evidence(id) => {
                hasher.update(b"e");
                hasher.update(id.as_bytes());
            }
            OperandRef::Trace(id) => {
                hasher.update(b"t");
                hasher.update(id.as_bytes());
            }
        }
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Citation, EvidenceItem};

    fn item(metric: &str, period: Period, value: f64, unit: Unit) -> EvidenceItem {
        EvidenceItem {
            id: Uuid::new_v4(),
            metric: metric.to_string(),
            value,
            unit,
            period,
            citation: Citation {
                document_id: format!("{}-{}", metric, period),
                locator: "p.3".to_string(),
            },
            relevance: 0.9,
        }
    }

    fn ledger_with(items: Vec<EvidenceItem>) -> EvidenceLedger {
        let mut ledger = EvidenceLedger::new(Uuid::new_v4());
        for i in items {
            ledger.add_evidence(i);
        }
        ledger
    }

    #[test]
    fn test_percentage_change() {
        let q1 = Period::quarter(2023, 1);
        let q2 = Period::quarter(2024, 1);
        let old = item("net_profit", q1, 100.0, Unit::Currency);
        let new = item("net_profit", q2, 150.0, Unit::Currency);
        let (old_id, new_id) = (old.id, new.id);
        let ledger = ledger_with(vec![old, new]);

        let trace = CalculationEngine::new()
            .compute(
                FormulaId::PercentageChange,
                &[
                    OperandBinding::evidence("old", old_id),
                    OperandBinding::evidence("new", new_id),
                ],
                &ledger,
            )
            .unwrap();

        assert_eq!(trace.result, 50.0);
        assert_eq!(trace.unit, Unit::Percent);
        assert_eq!(trace.steps.len(), 3);
    }

    #[test]
    fn test_percentage_change_zero_old_fails() {
        let q = Period::quarter(2023, 1);
        let old = item("x", q, 0.0, Unit::Currency);
        let new = item("x", Period::quarter(2024, 1), 5.0, Unit::Currency);
        let (old_id, new_id) = (old.id, new.id);
        let ledger = ledger_with(vec![old, new]);

        let err = CalculationEngine::new()
            .compute(
                FormulaId::PercentageChange,
                &[
                    OperandBinding::evidence("old", old_id),
                    OperandBinding::evidence("new", new_id),
                ],
                &ledger,
            )
            .unwrap_err();
        assert!(matches!(err, FormulaError::DivisionByZero(_)));
    }

    #[test]
    fn test_roe() {
        let q = Period::quarter(2024, 1);
        let income = item("net_income", q, 500.0, Unit::Currency);
        let equity = item("shareholders_equity", q, 5000.0, Unit::Currency);
        let (income_id, equity_id) = (income.id, equity.id);
        let ledger = ledger_with(vec![income, equity]);

        let trace = CalculationEngine::new()
            .compute(
                FormulaId::Roe,
                &[
                    OperandBinding::evidence("net_income", income_id),
                    OperandBinding::evidence("shareholders_equity", equity_id),
                ],
                &ledger,
            )
            .unwrap();

        assert_eq!(trace.result, 10.0);
        assert_eq!(trace.unit, Unit::Percent);
    }

    #[test]
    fn test_ratio_rejects_cross_period_operands() {
        let income = item("net_income", Period::quarter(2024, 1), 500.0, Unit::Currency);
        let equity = item(
            "shareholders_equity",
            Period::quarter(2023, 1),
            5000.0,
            Unit::Currency,
        );
        let (income_id, equity_id) = (income.id, equity.id);
        let ledger = ledger_with(vec![income, equity]);

        let err = CalculationEngine::new()
            .compute(
                FormulaId::Roe,
                &[
                    OperandBinding::evidence("net_income", income_id),
                    OperandBinding::evidence("shareholders_equity", equity_id),
                ],
                &ledger,
            )
            .unwrap_err();
        assert!(matches!(err, FormulaError::IncompatiblePeriods(_)));
    }

    #[test]
    fn test_unit_mismatch_fails_closed() {
        let q = Period::quarter(2024, 1);
        let a = item("a", q, 10.0, Unit::Currency);
        let b = item("b", q, 5.0, Unit::Percent);
        let (a_id, b_id) = (a.id, b.id);
        let ledger = ledger_with(vec![a, b]);

        let err = CalculationEngine::new()
            .compute(
                FormulaId::Sum,
                &[
                    OperandBinding::evidence("a", a_id),
                    OperandBinding::evidence("b", b_id),
                ],
                &ledger,
            )
            .unwrap_err();
        assert!(matches!(err, FormulaError::IncompatibleUnits(_)));
    }

    #[test]
    fn test_growth_rate_yoy_resolves_prior_from_ledger() {
        let current = item("net_profit", Period::quarter(2024, 3), 4400.0, Unit::Currency);
        let prior = item("net_profit", Period::quarter(2023, 3), 4000.0, Unit::Currency);
        let current_id = current.id;
        let ledger = ledger_with(vec![current, prior]);

        let trace = CalculationEngine::new()
            .compute(
                FormulaId::GrowthRateYoy,
                &[OperandBinding::evidence("current", current_id)],
                &ledger,
            )
            .unwrap();

        assert!((trace.result - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_growth_rate_missing_prior_period() {
        let current = item("net_profit", Period::quarter(2024, 3), 4400.0, Unit::Currency);
        let current_id = current.id;
        let ledger = ledger_with(vec![current]);

        let err = CalculationEngine::new()
            .compute(
                FormulaId::GrowthRateYoy,
                &[OperandBinding::evidence("current", current_id)],
                &ledger,
            )
            .unwrap_err();
        assert!(matches!(err, FormulaError::MissingOperand(_)));
    }

    #[test]
    fn test_compound_growth() {
        let start = item("revenue", Period::fiscal_year(2021), 100.0, Unit::Currency);
        let end = item("revenue", Period::fiscal_year(2023), 121.0, Unit::Currency);
        let (start_id, end_id) = (start.id, end.id);
        let ledger = ledger_with(vec![start, end]);

        let trace = CalculationEngine::new()
            .compute(
                FormulaId::CompoundGrowth,
                &[
                    OperandBinding::evidence("start", start_id),
                    OperandBinding::evidence("end", end_id),
                ],
                &ledger,
            )
            .unwrap();

        assert!((trace.result - 0.10).abs() < 1e-9);
        assert_eq!(trace.unit, Unit::Ratio);
    }

    #[test]
    fn test_compound_growth_rejects_bad_inputs() {
        let engine = CalculationEngine::new();

        // non-positive start
        let start = item("revenue", Period::fiscal_year(2021), 0.0, Unit::Currency);
        let end = item("revenue", Period::fiscal_year(2023), 121.0, Unit::Currency);
        let (s, e) = (start.id, end.id);
        let ledger = ledger_with(vec![start, end]);
        assert!(engine
            .compute(
                FormulaId::CompoundGrowth,
                &[OperandBinding::evidence("start", s), OperandBinding::evidence("end", e)],
                &ledger,
            )
            .is_err());

        // zero periods between start and end
        let start = item("revenue", Period::fiscal_year(2023), 100.0, Unit::Currency);
        let end = item("revenue", Period::fiscal_year(2023), 121.0, Unit::Currency);
        let (s, e) = (start.id, end.id);
        let ledger = ledger_with(vec![start, end]);
        assert!(engine
            .compute(
                FormulaId::CompoundGrowth,
                &[OperandBinding::evidence("start", s), OperandBinding::evidence("end", e)],
                &ledger,
            )
            .is_err());
    }

    #[test]
    fn test_average_and_sum() {
        let q = Period::quarter(2024, 1);
        let a = item("a", q, 10.0, Unit::Currency);
        let b = item("b", q, 20.0, Unit::Currency);
        let c = item("c", q, 30.0, Unit::Currency);
        let ids = [a.id, b.id, c.id];
        let ledger = ledger_with(vec![a, b, c]);

        let bindings: Vec<OperandBinding> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| OperandBinding::evidence(format!("v{}", i), *id))
            .collect();

        let engine = CalculationEngine::new();
        let sum = engine.compute(FormulaId::Sum, &bindings, &ledger).unwrap();
        assert_eq!(sum.result, 60.0);
        assert_eq!(sum.steps.len(), 2);

        let avg = engine
            .compute(FormulaId::Average, &bindings, &ledger)
            .unwrap();
        assert_eq!(avg.result, 20.0);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let q = Period::quarter(2024, 1);
        let income = item("net_income", q, 500.0, Unit::Currency);
        let equity = item("shareholders_equity", q, 5000.0, Unit::Currency);
        let bindings = [
            OperandBinding::evidence("net_income", income.id),
            OperandBinding::evidence("shareholders_equity", equity.id),
        ];
        let ledger = ledger_with(vec![income, equity]);

        let engine = CalculationEngine::new();
        let a = engine.compute(FormulaId::Roe, &bindings, &ledger).unwrap();
        let b = engine.compute(FormulaId::Roe, &bindings, &ledger).unwrap();

        // bit-identical, id included
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_trace_provenance_is_complete() {
        let current = item("net_profit", Period::quarter(2024, 3), 4400.0, Unit::Currency);
        let prior = item("net_profit", Period::quarter(2023, 3), 4000.0, Unit::Currency);
        let current_id = current.id;
        let ledger = ledger_with(vec![current, prior]);

        let trace = CalculationEngine::new()
            .compute(
                FormulaId::GrowthRateYoy,
                &[OperandBinding::evidence("current", current_id)],
                &ledger,
            )
            .unwrap();

        for (i, step) in trace.steps.iter().enumerate() {
            for op in &step.operands {
                match op.provenance {
                    Provenance::Evidence(id) => assert!(ledger.evidence(id).is_some()),
                    Provenance::Trace(id) => assert!(ledger.trace(id).is_some()),
                    Provenance::Step(j) => assert!(j < i),
                }
            }
        }
    }
}
