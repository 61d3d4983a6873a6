//! AWS connection identity and credential resolution.
//!
//! A connection is described by a set of resource-identity parts (partition,
//! service, region, account, resource type, resource name) plus access
//! credentials. The parts compose into an ARN and an explicit ARN decomposes
//! back into parts; for canonical colon-form identifiers the two operations
//! are inverses.

use crate::error::ConfigurationError;
use crate::settings::QueueSettings;
use tracing::debug;

/// Normalized connection descriptor for an AWS resource.
///
/// Built once per queue open and immutable afterwards; re-resolved only when
/// the queue is re-opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsConnectionParams {
    pub partition: Option<String>,
    pub service: Option<String>,
    pub region: Option<String>,
    pub account: Option<String>,
    pub resource_type: Option<String>,
    pub resource: Option<String>,
    /// Explicitly supplied identifier, kept verbatim when present
    arn: Option<String>,
    pub access_id: Option<String>,
    pub access_key: Option<String>,
}

impl AwsConnectionParams {
    /// Compose the resource identifier from parts, unless one was supplied
    /// whole. The resource-type segment is omitted when absent.
    pub fn arn(&self) -> String {
        if let Some(ref arn) = self.arn {
            return arn.clone();
        }

        let mut arn = String::from("arn");
        arn.push(':');
        arn.push_str(self.partition.as_deref().unwrap_or("aws"));
        arn.push(':');
        arn.push_str(self.service.as_deref().unwrap_or(""));
        arn.push(':');
        arn.push_str(self.region.as_deref().unwrap_or(""));
        arn.push(':');
        arn.push_str(self.account.as_deref().unwrap_or(""));
        if let Some(ref resource_type) = self.resource_type {
            arn.push(':');
            arn.push_str(resource_type);
        }
        arn.push(':');
        arn.push_str(self.resource.as_deref().unwrap_or(""));

        arn
    }

    /// Decompose a supplied identifier into parts.
    ///
    /// Grammar: `arn:partition:service:region:account:resource-type:resource`.
    /// When only five segments follow the scheme, the final segment is split
    /// on `/` into `resource-type/resource`; without a slash it is the bare
    /// resource name.
    pub fn set_arn(&mut self, arn: &str) {
        self.arn = Some(arn.to_string());

        let tokens: Vec<&str> = arn.split(':').collect();
        self.partition = tokens.get(1).and_then(|t| non_empty(t));
        self.service = tokens.get(2).and_then(|t| non_empty(t));
        self.region = tokens.get(3).and_then(|t| non_empty(t));
        self.account = tokens.get(4).and_then(|t| non_empty(t));

        if tokens.len() > 6 {
            self.resource_type = tokens.get(5).and_then(|t| non_empty(t));
            self.resource = tokens.get(6).and_then(|t| non_empty(t));
        } else if let Some(last) = tokens.get(5) {
            match last.split_once('/') {
                Some((resource_type, resource)) if !resource_type.is_empty() => {
                    self.resource_type = Some(resource_type.to_string());
                    self.resource = non_empty(resource);
                }
                _ => {
                    self.resource_type = None;
                    self.resource = non_empty(last);
                }
            }
        }
    }

    /// Override the resource name, discarding any verbatim identifier so the
    /// composed ARN reflects the change.
    pub fn set_resource(&mut self, resource: &str) {
        self.arn = None;
        self.resource = Some(resource.to_string());
    }

    /// Override the service name, discarding any verbatim identifier.
    pub fn set_service(&mut self, service: &str) {
        self.arn = None;
        self.service = Some(service.to_string());
    }

    /// Validate that the descriptor identifies a reachable resource.
    ///
    /// Fails when neither an identifier nor its parts were assembled, or when
    /// the region or either credential is missing.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.arn() == "arn:aws::::" {
            return Err(ConfigurationError::NoConnection);
        }
        if self.region.is_none() {
            return Err(ConfigurationError::NoRegion);
        }
        if self.access_id.is_none() {
            return Err(ConfigurationError::NoAccessId);
        }
        if self.access_key.is_none() {
            return Err(ConfigurationError::NoAccessKey);
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Resolves a connection descriptor from configured settings.
#[derive(Debug, Clone)]
pub struct AwsConnectionResolver {
    settings: QueueSettings,
}

impl AwsConnectionResolver {
    pub fn new(settings: QueueSettings) -> Self {
        Self { settings }
    }

    /// Assemble and validate connection parameters.
    ///
    /// An explicitly configured ARN takes precedence over individual parts:
    /// it is decomposed and overwrites them.
    pub fn resolve(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<AwsConnectionParams, ConfigurationError> {
        let connection = &self.settings.connection;
        let credential = &self.settings.credential;

        let mut params = AwsConnectionParams {
            partition: connection.partition.clone(),
            service: connection.service.clone(),
            region: connection.region.clone(),
            account: connection.account.clone(),
            resource_type: connection.resource_type.clone(),
            resource: connection.resource.clone(),
            arn: None,
            access_id: credential.access_id.clone(),
            access_key: credential.access_key.clone(),
        };

        // Force identifier decomposition when one is supplied whole
        if let Some(arn) = connection.arn.clone() {
            params.set_arn(&arn);
        }

        params.validate()?;

        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            arn = %params.arn(),
            "Resolved AWS connection"
        );

        Ok(params)
    }
}

#[cfg(test)]
#[path = "connect_tests.rs"]
mod tests;
