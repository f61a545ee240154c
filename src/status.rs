use serde::Serialize;

/// Provider-reported state for one resource kind, with a human-readable
/// message. A failed status query yields `status: "error"` and the error
/// text, never an exception.
#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub status: String,
    pub message: String,
}

impl KindStatus {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }

    pub fn error(err: &anyhow::Error) -> Self {
        Self::new("error", format!("{err:#}"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LambdaFunctionDetail {
    pub name: String,
    pub runtime: Option<String>,
    pub memory_mb: Option<i32>,
    pub reserved_concurrency: Option<i32>,
    pub provisioned_concurrency_configs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LambdaStatus {
    pub status: String,
    pub message: String,
    pub functions: Vec<LambdaFunctionDetail>,
}

impl LambdaStatus {
    pub fn error(err: &anyhow::Error) -> Self {
        Self {
            status: "error".to_string(),
            message: format!("{err:#}"),
            functions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Ec2InstanceDetail {
    pub id: String,
    pub state: String,
    pub instance_type: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ec2Status {
    pub status: String,
    pub message: String,
    pub instances: Vec<Ec2InstanceDetail>,
}

impl Ec2Status {
    pub fn error(err: &anyhow::Error) -> Self {
        Self {
            status: "error".to_string(),
            message: format!("{err:#}"),
            instances: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudFrontDistributionDetail {
    pub id: String,
    pub enabled: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudFrontStatus {
    pub status: String,
    pub message: String,
    pub distributions: Vec<CloudFrontDistributionDetail>,
}

impl CloudFrontStatus {
    pub fn error(err: &anyhow::Error) -> Self {
        Self {
            status: "error".to_string(),
            message: format!("{err:#}"),
            distributions: Vec::new(),
        }
    }
}

/// Unified read-only snapshot across every resource kind.
///
/// Purely derived from live provider state; each sub-status is queried in
/// isolation so one failing kind never hides the others.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub rds: KindStatus,
    pub elasticache: KindStatus,
    pub apprunner: KindStatus,
    pub lambda: LambdaStatus,
    pub ec2: Ec2Status,
    pub cloudfront: CloudFrontStatus,
}
