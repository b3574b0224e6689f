//! A small country rule set
//!
//! One person entity and a household with parents and children, a flat
//! income tax, a progressive social security contribution, a basic income
//! and a housing allowance for tenants. Used by the binaries and the tests.

use serde_json::json;

use crate::arrays::{Array, PossibleValues, ValueType};
use crate::entities::{Entity, Role};
use crate::errors::{CalculationError, Result};
use crate::parameters::ParameterNode;
use crate::periods::DateUnit;
use crate::system::TaxBenefitSystem;
use crate::variables::{Formula, InputSplit, Variable};

pub const COUNTRY_VERSION: &str = "1.0.0";

/// Adult age for the basic income
pub const ADULT_AGE: i64 = 18;

pub fn entities() -> Vec<Entity> {
    vec![
        Entity::person("person", "persons").with_label("Person"),
        Entity::group(
            "household",
            "households",
            vec![
                Role::new("parent", Some("parents")).with_max(2),
                Role::new("child", Some("children")),
            ],
        )
        .with_label("Household"),
    ]
}

/// Parameters live under `gov`, which also receives the abolition switches
pub fn parameters() -> Result<ParameterNode> {
    let data = json!({
        "gov": {
            "tax": {
                "income_tax_rate": {
                    "description": "Flat income tax rate",
                    "values": {"2012-01-01": 0.15, "2020-01-01": 0.2}
                },
                "social_security_contribution": {
                    "brackets": [
                        {"threshold": {"2013-01-01": 0.0}, "rate": {"2013-01-01": 0.03}},
                        {"threshold": {"2013-01-01": 6000.0}, "rate": {"2013-01-01": 0.08}},
                        {"threshold": {"2013-01-01": 12000.0}, "rate": {"2013-01-01": 0.1}}
                    ]
                }
            },
            "benefits": {
                "basic_income": {
                    "description": "Monthly basic income for adults",
                    "values": {"2015-12-01": 600.0}
                },
                "housing_allowance": {
                    "description": "Share of the rent paid to tenants",
                    "values": {"2010-01-01": 0.25}
                }
            },
            "indices": {
                "cpi": {"values": {"2018-01-01": 100.0, "2019-01-01": 102.0, "2020-01-01": 103.0}}
            }
        }
    });
    Ok(ParameterNode::from_json("", &data)?)
}

fn housing_occupancy_status() -> Variable {
    Variable::new_enum(
        "housing_occupancy_status",
        "household",
        PossibleValues::new("HousingOccupancyStatus", &["tenant", "owner", "free_lodger", "homeless"]),
        DateUnit::Month,
    )
    .with_label("Legal housing situation of the household")
}

pub fn variables() -> Vec<Variable> {
    vec![
        Variable::new("age", "person", ValueType::Int, DateUnit::Month).with_label("Age in years"),
        Variable::new("salary", "person", ValueType::Float, DateUnit::Month)
            .with_label("Gross salary")
            .with_unit("currency")
            .with_input_split(InputSplit::Divide),
        Variable::new("income_tax", "person", ValueType::Float, DateUnit::Month)
            .with_label("Income tax")
            .with_formula(Formula::with_parameters(|ctx, period, parameters| {
                let salary = ctx.calculate("salary", period)?.to_f64();
                let rate = parameters.at(period.start())?.value("gov.tax.income_tax_rate")?;
                Ok(Array::Float(salary.iter().map(|s| s * rate).collect()))
            })),
        Variable::new("social_security_contribution", "person", ValueType::Float, DateUnit::Month)
            .with_label("Progressive contribution on salaries")
            .with_formula(Formula::with_parameters(|ctx, period, parameters| {
                let salary = ctx.calculate("salary", period)?.to_f64();
                let scale = parameters
                    .at(period.start())?
                    .scale("gov.tax.social_security_contribution")?;
                Ok(Array::Float(scale.calc(&salary)))
            })),
        Variable::new("basic_income", "person", ValueType::Float, DateUnit::Month)
            .with_label("Basic income for adults")
            .with_formula(Formula::with_parameters(|ctx, period, parameters| {
                let age = ctx.calculate("age", period)?.to_f64();
                let amount = parameters.at(period.start())?.value("gov.benefits.basic_income")?;
                Ok(Array::Float(
                    age.iter()
                        .map(|&a| if a >= ADULT_AGE as f64 { amount } else { 0.0 })
                        .collect(),
                ))
            })),
        Variable::new("rent", "household", ValueType::Float, DateUnit::Month)
            .with_label("Rent paid by the household")
            .with_unit("currency"),
        housing_occupancy_status(),
        Variable::new("is_tenant", "household", ValueType::Bool, DateUnit::Month).with_formula(Formula::simple(
            |ctx, period| match ctx.calculate("housing_occupancy_status", period)? {
                Array::Enum(status) => {
                    let tenant = status.possible_values.index_of("tenant");
                    Ok(Array::Bool(status.indices.iter().map(|&i| Some(i) == tenant).collect()))
                }
                other => Err(CalculationError::formula(
                    "is_tenant",
                    format!("expected an enum status, got {:?}", other.value_type()),
                )),
            },
        )),
        Variable::new("housing_allowance", "household", ValueType::Float, DateUnit::Month)
            .with_label("Housing allowance for tenants")
            .defined_for("is_tenant")
            .with_formula(Formula::with_parameters(|ctx, period, parameters| {
                let rent = ctx.calculate("rent", period)?.to_f64();
                let share = parameters.at(period.start())?.value("gov.benefits.housing_allowance")?;
                Ok(Array::Float(rent.iter().map(|r| r * share).collect()))
            })),
        Variable::new("total_taxes", "person", ValueType::Float, DateUnit::Month)
            .with_adds(["income_tax", "social_security_contribution"]),
        Variable::new("disposable_income", "person", ValueType::Float, DateUnit::Month)
            .with_label("Income after taxes and benefits")
            .with_adds(["salary", "basic_income"])
            .with_subtracts(["income_tax", "social_security_contribution"]),
        Variable::new("household_income", "household", ValueType::Float, DateUnit::Month).with_formula(
            Formula::simple(|ctx, period| {
                let mut income = ctx.calculate_for("disposable_income", period, "household")?;
                let allowance = ctx.calculate("housing_allowance", period)?.to_f64();
                if let Array::Float(values) = &mut income {
                    values.iter_mut().zip(allowance).for_each(|(v, a)| *v += a);
                }
                Ok(income)
            }),
        ),
    ]
}

/// The rule set as a ready-to-use system
pub fn tax_benefit_system() -> Result<TaxBenefitSystem> {
    Ok(TaxBenefitSystem::new(entities(), parameters()?, variables())?.with_country_version(COUNTRY_VERSION))
}
