//! Collection job: a validated request template with its runtime bindings

use serde_json::{Map, Value};

use crate::fetcher::auth::Credentials;
use crate::template::{
    CurrencyPair, ParamLocation, RequestTemplate, ValidationError, ValidationErrorKind, ValidationErrors,
};

/// Parameter value resolved from a binding or a default
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Parameter name
    pub name: String,
    /// Placement
    pub location: ParamLocation,
    /// Value
    pub value: Value,
}

impl BoundParam {
    /// Value as it appears in a URL, query string or header
    pub fn as_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One binding set of a job; pair jobs have one target per currency pair
#[derive(Debug, Clone, PartialEq)]
pub struct JobTarget {
    pair: Option<CurrencyPair>,
    symbol: Option<String>,
    params: Vec<BoundParam>,
}

impl JobTarget {
    /// Currency pair collected by this target
    pub fn pair(&self) -> Option<&CurrencyPair> {
        self.pair.as_ref()
    }

    /// Pair as spelled by the exchange
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Bound parameters in template order
    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }
}

/// Everything one exchange loop needs to collect
///
/// A job holds one or more targets sharing a template, credentials and (through
/// the exchange id) one rate-limit bucket. A collection cycle walks every target
/// in order.
#[derive(Debug, Clone)]
pub struct CollectionJob {
    template: RequestTemplate,
    targets: Vec<JobTarget>,
    credentials: Credentials,
}

impl CollectionJob {
    /// Bind parameter values and credentials to a template
    ///
    /// Fails with every problem found: unknown bindings, missing required or
    /// path parameters, mistyped values and missing credentials.
    pub fn new(
        template: RequestTemplate,
        bindings: Map<String, Value>,
        credentials: Credentials,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = Vec::new();
        let params = bind(&template, &bindings, &credentials, &mut errors);
        if !errors.is_empty() {
            return Err(ValidationErrors::new(errors));
        }
        Ok(Self {
            template,
            targets: vec![JobTarget {
                pair: None,
                symbol: None,
                params,
            }],
            credentials,
        })
    }

    /// Bind a job that collects every pair in `pairs`
    ///
    /// Each pair is spelled through the template's `pair_format` and bound to its
    /// parameter; the remaining bindings are shared by all pairs. The pair
    /// parameter itself must not be bound directly.
    pub fn with_pairs(
        template: RequestTemplate,
        mut bindings: Map<String, Value>,
        pairs: Vec<CurrencyPair>,
        credentials: Credentials,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = Vec::new();
        let Some(pair_format) = template.pair_format.clone() else {
            return Err(ValidationErrors::new(vec![ValidationError::new(
                "pairs",
                ValidationErrorKind::Constraint("template has no pair_format".to_string()),
            )]));
        };

        if pairs.is_empty() {
            errors.push(ValidationError::new(
                "pairs",
                ValidationErrorKind::InvalidValue("at least one pair is required".to_string()),
            ));
        }
        for (i, pair) in pairs.iter().enumerate() {
            if pairs[..i].contains(pair) {
                errors.push(ValidationError::new(
                    format!("pairs[{i}]"),
                    ValidationErrorKind::Duplicate(format!("pair '{pair}'")),
                ));
            }
        }
        if bindings.contains_key(&pair_format.parameter) {
            errors.push(ValidationError::new(
                format!("bindings.{}", pair_format.parameter),
                ValidationErrorKind::Constraint("bound by the job's pairs".to_string()),
            ));
        }

        // Bind once with a stand-in; each target then swaps in its own pair
        bindings.insert(pair_format.parameter.clone(), Value::String(String::new()));
        let params = bind(&template, &bindings, &credentials, &mut errors);
        if !errors.is_empty() {
            return Err(ValidationErrors::new(errors));
        }

        let targets = pairs
            .into_iter()
            .map(|pair| {
                let symbol = pair_format.format(&pair);
                let params = params
                    .iter()
                    .cloned()
                    .map(|mut param| {
                        if param.name == pair_format.parameter {
                            param.value = Value::String(symbol.clone());
                        }
                        param
                    })
                    .collect();
                JobTarget {
                    pair: Some(pair),
                    symbol: Some(symbol),
                    params,
                }
            })
            .collect();

        Ok(Self {
            template,
            targets,
            credentials,
        })
    }

    /// Exchange identifier
    pub fn exchange(&self) -> &str {
        &self.template.exchange
    }

    /// Request template
    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    /// Targets in collection order (never empty)
    pub fn targets(&self) -> &[JobTarget] {
        &self.targets
    }

    /// Credentials
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Resolve every declared parameter, pushing binding and credential problems
fn bind(
    template: &RequestTemplate,
    bindings: &Map<String, Value>,
    credentials: &Credentials,
    errors: &mut Vec<ValidationError>,
) -> Vec<BoundParam> {
    for name in bindings.keys() {
        if !template.parameters.iter().any(|p| &p.name == name) {
            errors.push(ValidationError::new(
                format!("bindings.{name}"),
                ValidationErrorKind::UnknownField,
            ));
        }
    }

    let mut params = Vec::with_capacity(template.parameters.len());
    for parameter in &template.parameters {
        let path = format!("bindings.{}", parameter.name);
        let value = bindings
            .get(&parameter.name)
            .filter(|v| !v.is_null())
            .or(parameter.default.as_ref());
        match value {
            Some(v) if parameter.param_type.accepts(v) => params.push(BoundParam {
                name: parameter.name.clone(),
                location: parameter.location,
                value: v.clone(),
            }),
            Some(v) => errors.push(ValidationError::new(
                path,
                ValidationErrorKind::WrongType {
                    expected: parameter.param_type.as_str(),
                    found: json_type(v),
                },
            )),
            None if parameter.required || parameter.location == ParamLocation::Path => {
                errors.push(ValidationError::new(path, ValidationErrorKind::Missing))
            }
            None => {}
        }
    }

    if template.auth.needs_key() && credentials.api_key.is_none() {
        errors.push(ValidationError::new("credentials.api_key", ValidationErrorKind::Missing));
    }
    if template.auth.needs_secret() && credentials.secret.is_none() {
        errors.push(ValidationError::new("credentials.secret", ValidationErrorKind::Missing));
    }
    params
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
