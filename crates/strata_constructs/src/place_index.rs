//! Location service place indexes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::validate::{length_between, matches_pattern};
use strata_core::{App, Resolvable, ScopeId, ValidationError};

use crate::error::ConstructResult;
use crate::{get_att, reference, Construct};

pub const RESOURCE_TYPE: &str = "AWS::Location::PlaceIndex";

const NAME_PATTERN: &str = r"^[-._\w]+$";
const MAX_NAME_LENGTH: usize = 100;
const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// Geospatial data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataSource {
    #[default]
    Esri,
    Here,
}

/// Whether results may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntendedUse {
    SingleUse,
    Storage,
}

/// Properties of a [`PlaceIndex`].
#[derive(Debug, Clone, Default)]
pub struct PlaceIndexProps {
    pub place_index_name: Option<Resolvable<String>>,
    pub data_source: Option<DataSource>,
    pub intended_use: Option<IntendedUse>,
    pub description: Option<String>,
}

impl PlaceIndexProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<Resolvable<String>>) -> Self {
        self.place_index_name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DataSourceConfiguration {
    intended_use: IntendedUse,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PlaceIndexResource {
    index_name: Resolvable<String>,
    data_source: DataSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_source_configuration: Option<DataSourceConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    length_between("placeIndexName", name, 1, MAX_NAME_LENGTH)?;
    matches_pattern(
        "placeIndexName",
        name,
        NAME_PATTERN,
        "alphanumeric characters, hyphens, periods and underscores",
    )
}

/// A place index.
#[derive(Debug, Clone)]
pub struct PlaceIndex {
    scope: ScopeId,
    logical_id: String,
    physical_name: Resolvable<String>,
}

impl PlaceIndex {
    pub fn new(app: &mut App, parent: ScopeId, id: &str, props: PlaceIndexProps) -> ConstructResult<Self> {
        let scope = app.add_scope(parent, id)?;

        if let Some(description) = &props.description {
            app.ensure(
                scope,
                length_between("description", description, 0, MAX_DESCRIPTION_LENGTH),
            )?;
        }

        let physical_name = match props.place_index_name {
            Some(name) => {
                app.with_resolved(scope, name.clone(), |name: String| validate_name(&name))?;
                name
            }
            None => {
                let unique_id: String = app.unique_id(scope)?.chars().take(MAX_NAME_LENGTH).collect();
                Resolvable::Deferred(app.lazy("PlaceIndexName", move || unique_id))
            }
        };

        let resource = PlaceIndexResource {
            index_name: physical_name.clone(),
            data_source: props.data_source.unwrap_or_default(),
            data_source_configuration: props
                .intended_use
                .map(|intended_use| DataSourceConfiguration { intended_use }),
            description: props.description,
        };
        let logical_id = app.add_resource(scope, RESOURCE_TYPE, &resource)?;

        Ok(Self {
            scope,
            logical_id,
            physical_name,
        })
    }

    /// The index name as given, or a placeholder for the generated one.
    pub fn physical_name(&self) -> &Resolvable<String> {
        &self.physical_name
    }

    pub fn place_index_name(&self) -> Value {
        reference(&self.logical_id)
    }

    pub fn place_index_arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn place_index_create_time(&self) -> Value {
        get_att(&self.logical_id, "CreateTime")
    }
}

impl Construct for PlaceIndex {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn logical_id(&self) -> &str {
        &self.logical_id
    }
}
