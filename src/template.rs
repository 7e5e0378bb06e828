// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Turns an instance's property set into the configuration file its broker starts from

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::error::ErrorKind;
use crate::topology::{InstanceSpec, Properties};
use crate::Error;

/// Placeholder in a template that is replaced with the URI of the instance's property file
pub const PROPERTIES_FILE_MARKER: &str = "@@PROPERTIESFILE@@";
pub const TEMPLATE_EXTENSION: &str = "xml";
pub const PROPERTIES_EXTENSION: &str = "properties";

#[async_trait]
pub trait Materializer: Send + Sync {
    /// Produces the configuration artifact for `spec` and returns its location
    async fn materialize(&self, spec: &InstanceSpec) -> Result<PathBuf, Error>;
}

/// Reads `<template_dir>/<template_id>.xml` and writes `<output_dir>/<stem>.xml` next to `<stem>.properties`
#[derive(Clone, Debug)]
pub struct FileMaterializer {
    template_dir: PathBuf,
    output_dir: PathBuf,
}

impl FileMaterializer {
    pub fn new(template_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn template_path(&self, template_id: &str) -> PathBuf {
        self.template_dir
            .join(format!("{}.{}", template_id, TEMPLATE_EXTENSION))
    }
}

#[async_trait]
impl Materializer for FileMaterializer {
    async fn materialize(&self, spec: &InstanceSpec) -> Result<PathBuf, Error> {
        let template_path = self.template_path(spec.template_id());
        let materialize_err = |source: io::Error| ErrorKind::Materialize {
            template: spec.template_id().to_string(),
            source,
        };

        let template = match fs::read_to_string(&template_path).await {
            Ok(template) => template,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ErrorKind::TemplateNotFound {
                    template: spec.template_id().to_string(),
                    path: template_path,
                }
                .into())
            }
            Err(e) => return Err(materialize_err(e).into()),
        };

        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(materialize_err)?;
        let output_dir = fs::canonicalize(&self.output_dir)
            .await
            .map_err(materialize_err)?;

        let stem = spec.artifact_stem();
        let properties_path = output_dir.join(format!("{}.{}", stem, PROPERTIES_EXTENSION));
        let artifact_path = output_dir.join(format!("{}.{}", stem, TEMPLATE_EXTENSION));

        let header = format!(
            "Properties used by the {} configuration file",
            artifact_path.display()
        );
        fs::write(&properties_path, render_properties(&header, spec.properties()))
            .await
            .map_err(materialize_err)?;

        let rendered = render_template(&template, &properties_path, spec.properties());
        fs::write(&artifact_path, rendered)
            .await
            .map_err(materialize_err)?;

        debug!(
            identifier = spec.identifier(),
            artifact = %artifact_path.display(),
            "materialized configuration"
        );
        Ok(artifact_path)
    }
}

/// Substitutes the property file marker and every `${key}` placeholder
pub fn render_template(template: &str, properties_path: &Path, properties: &Properties) -> String {
    let mut rendered = template.replace(PROPERTIES_FILE_MARKER, &file_uri(properties_path));
    for (key, value) in properties {
        rendered = rendered.replace(&format!("${{{}}}", key), value);
    }

    rendered
}

/// `key=value` lines in insertion order under a `#` comment
pub fn render_properties(header: &str, properties: &Properties) -> String {
    let mut out = String::new();
    for line in header.lines() {
        let _ = writeln!(out, "#{}", line);
    }

    for (key, value) in properties {
        let _ = writeln!(out, "{}={}", escape(key), escape(value));
    }

    out
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' | '=' | ':' | '#' | '!' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }

    escaped
}

/// Percent-encoded `file://` URI of an absolute path
fn file_uri(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.into(),
        // relative paths have no file URI, leave them as written
        Err(()) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateNames;
    use crate::topology::{GeneratorContext, PortAllocator, Topology};

    fn flat_spec() -> InstanceSpec {
        let templates = TemplateNames::default();
        let ctx = GeneratorContext {
            hostname: "localhost",
            templates: &templates,
        };

        Topology::Flat { count: 1 }
            .generate(&mut PortAllocator::new(20000), &ctx)
            .remove(0)
    }

    #[test]
    fn test_render_properties_escapes() {
        let mut props = Properties::new();
        props.insert("a.key".to_string(), "x=y:z".to_string());
        props.insert("path".to_string(), "c:\\tmp".to_string());

        let rendered = render_properties("header", &props);
        assert_eq!(rendered, "#header\na.key=x\\=y\\:z\npath=c\\:\\\\tmp\n");
    }

    #[test]
    fn test_render_template_placeholders() {
        let mut props = Properties::new();
        props.insert("port.number".to_string(), "20000".to_string());

        let rendered = render_template(
            "<props location=\"@@PROPERTIESFILE@@\"/><uri>tcp://0.0.0.0:${port.number}</uri>${missing}",
            Path::new("/tmp/x.properties"),
            &props,
        );
        assert_eq!(
            rendered,
            "<props location=\"file:///tmp/x.properties\"/><uri>tcp://0.0.0.0:20000</uri>${missing}"
        );
    }

    #[test]
    fn test_file_uri_is_percent_encoded() {
        assert_eq!(
            file_uri(Path::new("/var/fleet out/#2/activemq-0.properties")),
            "file:///var/fleet%20out/%232/activemq-0.properties"
        );
        assert_eq!(file_uri(Path::new("relative.properties")), "relative.properties");
    }

    #[tokio::test]
    async fn test_materialize_writes_both_files() {
        let templates = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(
            templates.path().join("activemq.xml"),
            "<broker name=\"${activemq.suffix.name}\" props=\"@@PROPERTIESFILE@@\"/>\n",
        )
        .unwrap();

        let materializer = FileMaterializer::new(templates.path(), output.path());
        let artifact = materializer.materialize(&flat_spec()).await.unwrap();

        assert_eq!(artifact.file_name().unwrap(), "activemq-0.xml");
        let config = std::fs::read_to_string(&artifact).unwrap();
        assert!(config.starts_with("<broker name=\"0\" props=\"file://"));
        assert!(config.contains("activemq-0.properties"));

        let props =
            std::fs::read_to_string(artifact.with_extension(PROPERTIES_EXTENSION)).unwrap();
        assert!(props.starts_with('#'));
        assert!(props.contains("port.number=20000\n"));
        assert!(props.contains("kahadb.prefix=0\n"));
    }

    #[tokio::test]
    async fn test_missing_template() {
        let templates = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let materializer = FileMaterializer::new(templates.path(), output.path());
        let err = materializer.materialize(&flat_spec()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TemplateNotFound { .. }));
    }
}
