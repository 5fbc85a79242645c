//! Schema/Capability Descriptors
//!
//! Static declarations of what a backend can be asked: the queryable fields,
//! the syntax rules the generator must follow, and the dialect. Pure data.

use crate::nlq::query::Dialect;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
        }
    }

    pub fn described(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub dialect: Dialect,
    /// Role the generator is asked to play.
    pub role: String,
    /// Fully qualified table, when the dialect addresses one.
    #[serde(default)]
    pub table: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    pub rules: Vec<String>,
}

impl SchemaDescriptor {
    /// Billing warehouse holding a flattened CUR v2 table.
    pub fn cur_warehouse(database: &str, table: &str) -> Self {
        Self {
            dialect: Dialect::WarehouseSql,
            role: "You write SQL for an Athena/Trino billing warehouse that holds an AWS Cost and Usage Report.".to_string(),
            table: Some(format!("{}.{}", database, table)),
            fields: vec![
                FieldDescriptor::described("lineitem/productcode", "AWS service code, e.g. AmazonEC2"),
                FieldDescriptor::described("lineitem/unblendedcost", "cost of the line item in USD"),
                FieldDescriptor::described("lineitem/usagestartdate", "usage start timestamp"),
                FieldDescriptor::described("lineitem/usageaccountid", "account that used the resource"),
                FieldDescriptor::described("lineitem/resourceid", "resource identifier, when available"),
                FieldDescriptor::described("product/region", "AWS region code"),
                FieldDescriptor::described("lineitem/lineitemtype", "Usage, Tax, Credit, ..."),
            ],
            rules: vec![
                "Write only a valid SQL query, no explanation.".to_string(),
                "Columns are in CUR v2 format, so wrap column names in double quotes (e.g. \"lineitem/unblendedcost\").".to_string(),
                "Do not alias or rename columns.".to_string(),
                "The query must start with SELECT, WITH or EXPLAIN.".to_string(),
                "Return only the SQL query.".to_string(),
            ],
        }
    }

    /// Resource-configuration inventory query service.
    pub fn resource_config() -> Self {
        Self {
            dialect: Dialect::ResourceConfigDsl,
            role: "You are a FinOps assistant for an AWS Config style resource inventory. You generate valid resource queries only.".to_string(),
            table: None,
            fields: vec![
                FieldDescriptor::new("resourceId"),
                FieldDescriptor::new("resourceType"),
                FieldDescriptor::new("awsRegion"),
                FieldDescriptor::new("availabilityZone"),
                FieldDescriptor::described("configuration.tags.key", "tags"),
                FieldDescriptor::described("configuration.complianceType", "for rules"),
                FieldDescriptor::new("configuration.state"),
                FieldDescriptor::new("relationships"),
            ],
            rules: vec![
                "Use `SELECT field` or `SELECT COUNT(*)`".to_string(),
                "Use `WHERE` for filters with =, IN, AND, OR".to_string(),
                "Use `GROUP BY` to aggregate results (e.g., by region)".to_string(),
                "Do NOT use table names".to_string(),
                "Do NOT use JOINs".to_string(),
                "Only output the query. No explanation.".to_string(),
            ],
        }
    }

    /// Field list as prompt lines.
    pub fn field_lines(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| match &f.description {
                Some(d) => format!("- {} ({})", f.name, d),
                None => format!("- {}", f.name),
            })
            .collect()
    }
}
