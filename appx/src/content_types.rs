use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Package-specific types consulted before falling back to the generic MIME
/// tables. Every loose XML file in a package is a manifest of some kind.
const KNOWN_TYPES: [(&str, &str); 6] = [
    ("xml", "application/vnd.ms-appx.manifest+xml"),
    ("png", "image/png"),
    ("dll", "application/x-msdownload"),
    ("exe", "application/x-msdownload"),
    ("cat", "application/vnd.ms-pki.seccat"),
    ("appx", "application/vnd.ms-appx"),
];

#[derive(Clone, Debug)]
pub struct ContentTypesBuilder {
    ext: HashSet<String>,
    inner: Option<ContentTypes>,
}

impl ContentTypesBuilder {
    /// Records the extension of one entry, emitting a `Default` rule the
    /// first time each extension is seen. Extensionless entries contribute
    /// nothing.
    pub fn add(&mut self, name: &str) {
        if let Some(ext) = Path::new(name).extension() {
            if let Some(ext) = ext.to_str() {
                if !self.ext.contains(ext) {
                    self.inner.as_mut().unwrap().rules.push(Rule::Default {
                        ext: ext.into(),
                        mime: mime_for_ext(ext),
                    });
                    self.ext.insert(ext.to_string());
                }
            }
        }
    }

    /// Adds an `Override` rule for a single part. `part_name` is the archive
    /// name without the leading slash.
    pub fn add_override(&mut self, part_name: &str, mime: &str) {
        self.inner.as_mut().unwrap().rules.push(Rule::Override {
            part_name: format!("/{}", part_name),
            mime: mime.into(),
        });
    }

    pub fn finish(&mut self) -> ContentTypes {
        self.inner.take().unwrap()
    }
}

impl Default for ContentTypesBuilder {
    fn default() -> Self {
        Self {
            ext: Default::default(),
            inner: Some(Default::default()),
        }
    }
}

fn mime_for_ext(ext: &str) -> String {
    let lower = ext.to_ascii_lowercase();
    for (known, mime) in KNOWN_TYPES {
        if lower == known {
            return mime.to_string();
        }
    }
    mime_guess::from_ext(ext).first_or_octet_stream().to_string()
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename = "Types")]
pub struct ContentTypes {
    #[serde(rename = "xmlns")]
    xmlns: String,
    pub rules: Vec<Rule>,
}

impl Default for ContentTypes {
    fn default() -> Self {
        Self {
            xmlns: default_namespace(),
            rules: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum Rule {
    Default {
        #[serde(rename = "Extension")]
        ext: String,
        #[serde(rename = "ContentType")]
        mime: String,
    },
    Override {
        #[serde(rename = "PartName")]
        part_name: String,
        #[serde(rename = "ContentType")]
        mime: String,
    },
}

fn default_namespace() -> String {
    "http://schemas.openxmlformats.org/package/2006/content-types".into()
}
