//! Cost & Usage Report summary
//!
//! Aggregates unblended cost per service from a CUR CSV export (plain or
//! gzip) and asks the text generator for a written financial summary.

use crate::error::{CopilotError, Result};
use crate::llm::{GenerationParams, Prompt, TextGenerator};
use flate2::read::GzDecoder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

pub const PRODUCT_CODE_COLUMN: &str = "lineItem/ProductCode";
pub const UNBLENDED_COST_COLUMN: &str = "lineItem/UnblendedCost";
pub const DEFAULT_TOP_SERVICES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    pub product_code: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurSummary {
    /// Highest-cost services, descending.
    pub top_services: Vec<ServiceCost>,
    /// Total unblended cost over every parsed line item.
    pub total: f64,
    pub rows_read: usize,
    pub rows_skipped: usize,
}

impl CurSummary {
    pub fn from_path(path: &Path, top_n: usize) -> Result<Self> {
        let file = File::open(path)?;
        let is_gzip = path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("gz"));
        let reader: Box<dyn Read> = if is_gzip {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let summary = Self::from_reader(reader, top_n)?;
        info!(
            path = %path.display(),
            rows = summary.rows_read,
            skipped = summary.rows_skipped,
            "summarized cost and usage report"
        );
        Ok(summary)
    }

    pub fn from_reader<R: Read>(reader: R, top_n: usize) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| CopilotError::Config(format!("CUR file has no {} column", name)))
        };
        let product_idx = column(PRODUCT_CODE_COLUMN)?;
        let cost_idx = column(UNBLENDED_COST_COLUMN)?;

        let mut per_service: BTreeMap<String, f64> = BTreeMap::new();
        let mut total = 0.0;
        let mut rows_read = 0;
        let mut rows_skipped = 0;

        for (line, record) in csv_reader.records().enumerate() {
            let record = record?;
            rows_read += 1;
            let raw_cost = record.get(cost_idx).unwrap_or_default().trim();
            let cost: f64 = match raw_cost.parse() {
                Ok(cost) => cost,
                Err(_) => {
                    warn!(line = line + 2, value = raw_cost, "skipping line item with unparsable cost");
                    rows_skipped += 1;
                    continue;
                }
            };
            let product = record.get(product_idx).unwrap_or_default().to_string();
            *per_service.entry(product).or_insert(0.0) += cost;
            total += cost;
        }

        let top_services = per_service
            .into_iter()
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .take(top_n)
            .map(|(product_code, cost)| ServiceCost { product_code, cost })
            .collect();

        Ok(Self {
            top_services,
            total,
            rows_read,
            rows_skipped,
        })
    }

    /// One `"<service>: $<cost>"` line per top service.
    pub fn render_lines(&self) -> String {
        self.top_services
            .iter()
            .map(|s| format!("{}: {}", s.product_code, format_usd(s.cost)))
            .join("\n")
    }

    pub fn prompt(&self) -> Prompt {
        Prompt::user(format!(
            "Here is a summary of the top AWS services from a Cost and Usage Report:\n\n{}\n\nTotal monthly spend: {}\n\nPlease write a financial summary: highlight top spending categories, detect anomalies if any, and suggest optimizations.",
            self.render_lines(),
            format_usd(self.total)
        ))
    }

    pub async fn narrate(&self, generator: &dyn TextGenerator) -> Result<String> {
        generator.generate(&self.prompt(), &GenerationParams::summary()).await
    }
}

/// `$1,234.56` style formatting, sign after the currency symbol.
pub fn format_usd(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("${}{}.{}", sign, grouped, frac_part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
identity/LineItemId,lineItem/ProductCode,lineItem/UnblendedCost
1,AmazonEC2,1200.50
2,AmazonS3,10.25
3,AmazonEC2,300
4,AWSLambda,0.75
5,AmazonRDS,not-a-number
6,AmazonRDS,45
";

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(999.999), "$1,000.00");
        assert_eq!(format_usd(1234567.891), "$1,234,567.89");
        assert_eq!(format_usd(-42.5), "$-42.50");
        assert_eq!(format_usd(-0.001), "$0.00");
    }

    #[test]
    fn test_groups_and_ranks_services() {
        let summary = CurSummary::from_reader(SAMPLE.as_bytes(), 2).unwrap();
        assert_eq!(summary.rows_read, 6);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.top_services.len(), 2);
        assert_eq!(summary.top_services[0].product_code, "AmazonEC2");
        assert!((summary.top_services[0].cost - 1500.5).abs() < 1e-9);
        assert_eq!(summary.top_services[1].product_code, "AmazonRDS");
        assert!((summary.total - 1556.5).abs() < 1e-9);
        assert_eq!(summary.render_lines(), "AmazonEC2: $1,500.50\nAmazonRDS: $45.00");
    }

    #[test]
    fn test_prompt_contains_summary_and_total() {
        let summary = CurSummary::from_reader(SAMPLE.as_bytes(), DEFAULT_TOP_SERVICES).unwrap();
        let prompt = summary.prompt();
        assert!(prompt.system.is_none());
        assert!(prompt.user.contains("AWSLambda: $0.75"));
        assert!(prompt.user.contains("Total monthly spend: $1,556.50"));
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = CurSummary::from_reader("a,b\n1,2\n".as_bytes(), 10).unwrap_err();
        assert!(err.to_string().contains(PRODUCT_CODE_COLUMN));
    }

    #[test]
    fn test_reads_gzip_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("billing-00001.csv.gz");
        let mut encoder = flate2::write::GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let summary = CurSummary::from_path(&path, 1).unwrap();
        assert_eq!(summary.top_services[0].product_code, "AmazonEC2");
    }
}
