//! TSV and JSON export of analysis results.

use crate::diagnostics::AssumptionReport;
use crate::error::Result;
use crate::influence::{InfluenceMethod, InfluenceTable, LooOutcome, LooResult};
use crate::model::{CatalogEntry, CatalogRun};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{:.*}", precision, x),
        _ => "NA".to_string(),
    }
}

fn fmt_p(p: f64) -> String {
    if p.is_finite() {
        format!("{:.4e}", p)
    } else {
        "NA".to_string()
    }
}

/// Write every coefficient of every run, one row per coefficient.
///
/// Failed fits get a single row with the failure reason.
pub fn write_coefficients_tsv<P: AsRef<Path>>(path: P, runs: &[&CatalogRun]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(
        writer,
        "model\tvariant\tfamily\tn\tcoefficient\testimate\tstd_error\tstatistic\tdf\tp_value\tq_value\tfocal\tr2_marginal\tr2_conditional\twarnings"
    )?;

    for run in runs {
        for entry in &run.entries {
            match entry {
                CatalogEntry::Fitted { model, q_value } => {
                    let warnings: Vec<String> = model.warnings.iter().map(|w| w.to_string()).collect();
                    for c in &model.coefficients {
                        let focal = c.name == model.focal_coefficient;
                        writeln!(
                            writer,
                            "{}\t{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{:.4}\t{}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{}",
                            model.spec_name,
                            run.variant.label(),
                            model.family,
                            model.n_obs,
                            c.name,
                            c.estimate,
                            c.std_error,
                            c.statistic,
                            fmt_opt(c.df, 0),
                            fmt_p(c.p_value),
                            if focal { fmt_opt(*q_value, 4) } else { "NA".to_string() },
                            focal,
                            model.r2_marginal,
                            model.r2_conditional,
                            warnings.join("; ")
                        )?;
                    }
                }
                CatalogEntry::Failed { spec_name, reason } => {
                    writeln!(
                        writer,
                        "{}\t{}\tNA\t{}\tNA\tNA\tNA\tNA\tNA\tNA\tNA\tfalse\tNA\tNA\tfailed: {}",
                        spec_name,
                        run.variant.label(),
                        run.n_obs,
                        reason
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Write influence scores, one row per model and language.
pub fn write_influence_tsv<P: AsRef<Path>>(path: P, tables: &[InfluenceTable]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "model\tvariant\tmethod\tlanguage\tcooks_distance\tthreshold\tflagged")?;
    for t in tables {
        let method = match t.method {
            InfluenceMethod::FixedVariance => "fixed_variance",
            InfluenceMethod::Refit => "refit",
        };
        for r in &t.rows {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{:.6}\t{}",
                t.spec_name,
                t.variant.label(),
                method,
                r.language,
                fmt_opt(Some(r.cooks_distance), 6),
                t.threshold,
                r.flagged
            )?;
        }
    }
    Ok(())
}

/// Write leave-one-out records in their sorted order.
pub fn write_loo_tsv<P: AsRef<Path>>(path: P, results: &[LooResult]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "model\tdropped\testimate\tstd_error\tp_value\tsignificant\tstatus")?;
    for res in results {
        for rec in &res.records {
            match &rec.outcome {
                LooOutcome::Ok {
                    estimate,
                    std_error,
                    p_value,
                    significant,
                } => writeln!(
                    writer,
                    "{}\t{}\t{:.6}\t{:.6}\t{}\t{}\tok",
                    res.spec_name,
                    rec.dropped,
                    estimate,
                    std_error,
                    fmt_p(*p_value),
                    significant
                )?,
                LooOutcome::Failed { reason } => writeln!(
                    writer,
                    "{}\t{}\tNA\tNA\tNA\tfalse\tfailed: {}",
                    res.spec_name, rec.dropped, reason
                )?,
            }
        }
    }
    Ok(())
}

/// Write one row per model with the normality test results.
pub fn write_assumptions_tsv<P: AsRef<Path>>(path: P, reports: &[AssumptionReport]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(
        writer,
        "model\tvariant\tresidual_w\tresidual_p\tintercept_w\tintercept_p\tnote"
    )?;
    for r in reports {
        let res = r.residual_normality.result;
        let ri = r.random_intercept_normality.result;
        let notes: Vec<&str> = [&r.residual_normality.skipped, &r.random_intercept_normality.skipped]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .collect();
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.spec_name,
            r.variant.label(),
            fmt_opt(res.map(|s| s.w), 4),
            fmt_opt(res.map(|s| s.p_value), 4),
            fmt_opt(ri.map(|s| s.w), 4),
            fmt_opt(ri.map(|s| s.p_value), 4),
            notes.join("; ")
        )?;
    }
    Ok(())
}

/// Write any serializable value as pretty JSON.
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
