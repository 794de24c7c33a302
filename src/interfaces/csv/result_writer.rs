use crate::application::batch::BatchReport;
use crate::application::interest::SweepReport;
use crate::domain::accrual::InterestAccrual;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One output line, shared by every command so the CLI prints a single
/// stable column layout.
#[derive(Debug, Serialize)]
struct ResultRow {
    line: usize,
    outcome: &'static str,
    id: String,
    user_id: String,
    account_id: String,
    kind: String,
    amount: Decimal,
    status: String,
    new_balance: Option<Decimal>,
    error: String,
}

/// Writes operation results as CSV.
pub struct ResultWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// One line per submitted request, in submission order.
    pub fn write_batch(&mut self, report: &BatchReport) -> csv::Result<()> {
        let mut rows: Vec<ResultRow> = report
            .successes
            .iter()
            .map(|s| {
                let tx = &s.outcome.transaction;
                ResultRow {
                    line: s.index + 1,
                    outcome: "ok",
                    id: tx.id.to_string(),
                    user_id: tx.user_id.clone(),
                    account_id: tx.account_id.clone(),
                    kind: tx.kind.to_string(),
                    amount: tx.amount.value(),
                    status: tx.status.to_string(),
                    new_balance: Some(s.outcome.new_balance),
                    error: String::new(),
                }
            })
            .chain(report.failures.iter().map(|f| ResultRow {
                line: f.index + 1,
                outcome: "error",
                id: String::new(),
                user_id: f.request.user_id.clone(),
                account_id: f.request.account_id.clone(),
                kind: f.request.kind.to_string(),
                amount: f.request.amount,
                status: String::new(),
                new_balance: None,
                error: f.error.to_string(),
            }))
            .collect();
        rows.sort_by_key(|r| r.line);
        self.write_rows(rows)
    }

    pub fn write_accrual(&mut self, accrual: &InterestAccrual) -> csv::Result<()> {
        self.write_rows([accrual_row(1, accrual)])
    }

    pub fn write_sweep(&mut self, report: &SweepReport) -> csv::Result<()> {
        let rows = report.results.iter().enumerate().map(|(i, r)| ResultRow {
            line: i + 1,
            outcome: if r.is_success() { "ok" } else { "error" },
            id: r.accrual_id.to_string(),
            user_id: r.user_id.clone(),
            account_id: r.account_id.clone(),
            kind: "INTEREST".into(),
            amount: r.amount,
            status: String::new(),
            new_balance: None,
            error: r.error.as_ref().map(ToString::to_string).unwrap_or_default(),
        });
        self.write_rows(rows)
    }

    fn write_rows(&mut self, rows: impl IntoIterator<Item = ResultRow>) -> csv::Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn accrual_row(line: usize, accrual: &InterestAccrual) -> ResultRow {
    ResultRow {
        line,
        outcome: "ok",
        id: accrual.id.to_string(),
        user_id: accrual.user_id.clone(),
        account_id: accrual.account_id.clone(),
        kind: "INTEREST".into(),
        amount: accrual.interest.value(),
        status: accrual.status.to_string(),
        new_balance: None,
        error: String::new(),
    }
}
