//! Versioned artifact bundle and its on-disk store.
//!
//! A bundle directory holds five JSON artifacts plus a `bundle.json`
//! manifest carrying a SHA-256 digest of each. Every artifact is wrapped in
//! an [`ArtifactEnvelope`] naming the run that produced it, so a file
//! copied in from another run is rejected even when its digest is patched.
//!
//! [`BundleStore`] commits bundles by writing a staging directory, renaming
//! it under `runs/`, and only then swapping the `LATEST` pointer.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    classifier::{Classifier, ClassifierModel},
    encoding::{CategoryVocabulary, EncoderSet},
    error::ArtifactError,
    metrics::EvaluationReport,
    scaler::ScalerParameters,
    schema::FeatureSchema,
};

/// On-disk layout version written into every artifact and the manifest.
pub const FORMAT_VERSION: u32 = 1;
/// Manifest file name inside a bundle directory.
pub const MANIFEST_FILE: &str = "bundle.json";
/// Pointer file naming the newest committed run inside a store root.
pub const LATEST_FILE: &str = "LATEST";

/// The five artifacts of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Fitted classifier.
    Classifier,
    /// Scaler parameters.
    Scaler,
    /// Feature vocabularies.
    Vocabularies,
    /// Feature schema.
    Schema,
    /// Target label vocabulary.
    Labels,
}

impl ArtifactKind {
    /// Every artifact in write order.
    pub const ALL: [Self; 5] = [
        Self::Classifier,
        Self::Scaler,
        Self::Vocabularies,
        Self::Schema,
        Self::Labels,
    ];

    /// File name inside the bundle directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Classifier => "classifier.json",
            Self::Scaler => "scaler.json",
            Self::Vocabularies => "vocabularies.json",
            Self::Schema => "schema.json",
            Self::Labels => "labels.json",
        }
    }

    /// Short artifact name used in errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Scaler => "scaler",
            Self::Vocabularies => "vocabularies",
            Self::Schema => "schema",
            Self::Labels => "labels",
        }
    }
}

/// Wrapper stamped on every artifact file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope<T> {
    /// Layout version.
    pub format_version: u32,
    /// Run that produced the artifact.
    pub run_id: String,
    /// Which artifact this is.
    pub kind: ArtifactKind,
    /// Artifact content.
    pub payload: T,
}

/// Contents of `bundle.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Layout version.
    pub format_version: u32,
    /// Run that produced the bundle.
    pub run_id: String,
    /// Creation time of the bundle.
    pub created_at: DateTime<Utc>,
    /// Classifier algorithm name.
    pub algorithm: String,
    /// Held-out accuracy, when the run was evaluated.
    pub accuracy: Option<f64>,
    /// Full held-out evaluation, when the run was evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationReport>,
    /// SHA-256 hex digest per artifact file name.
    pub artifacts: IndexMap<String, String>,
}

/// Everything inference needs, produced by one training run.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    run_id: String,
    created_at: DateTime<Utc>,
    evaluation: Option<EvaluationReport>,
    schema: FeatureSchema,
    scaler: ScalerParameters,
    encoders: EncoderSet,
    classifier: ClassifierModel,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut file = File::create(path).map_err(|err| ArtifactError::io(path, err))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| ArtifactError::io(path, err))
}

fn sync_dir(path: &Path) {
    // Directory handles cannot be opened on every platform.
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

fn read_existing(path: &Path, artifact: &str) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ArtifactError::Missing {
                artifact: artifact.to_owned(),
                path: path.to_path_buf(),
            }
        } else {
            ArtifactError::io(path, err)
        }
    })
}

impl ArtifactBundle {
    /// Assembles a bundle, enforcing the same consistency rules as [`Self::load`].
    pub fn new(
        run_id: impl Into<String>,
        schema: FeatureSchema,
        scaler: ScalerParameters,
        encoders: EncoderSet,
        classifier: ClassifierModel,
        evaluation: Option<EvaluationReport>,
    ) -> Result<Self, ArtifactError> {
        let bundle = Self {
            run_id: run_id.into(),
            created_at: Utc::now(),
            evaluation,
            schema,
            scaler,
            encoders,
            classifier,
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Held-out evaluation recorded with the bundle.
    #[must_use]
    pub const fn evaluation(&self) -> Option<&EvaluationReport> {
        self.evaluation.as_ref()
    }

    /// Feature order.
    #[must_use]
    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Fitted scaler.
    #[must_use]
    pub const fn scaler(&self) -> &ScalerParameters {
        &self.scaler
    }

    /// Feature and label vocabularies.
    #[must_use]
    pub const fn encoders(&self) -> &EncoderSet {
        &self.encoders
    }

    /// Fitted classifier.
    #[must_use]
    pub const fn classifier(&self) -> &ClassifierModel {
        &self.classifier
    }

    /// Label vocabulary.
    pub fn labels(&self) -> Result<&CategoryVocabulary, ArtifactError> {
        self.encoders
            .labels()
            .map_err(|err| ArtifactError::corrupt(ArtifactKind::Labels.name(), err.to_string()))
    }

    /// Manifest describing this bundle without artifact digests.
    #[must_use]
    pub fn manifest(&self) -> BundleManifest {
        BundleManifest {
            format_version: FORMAT_VERSION,
            run_id: self.run_id.clone(),
            created_at: self.created_at,
            algorithm: self.classifier.algorithm().to_owned(),
            accuracy: self.evaluation.as_ref().map(|report| report.accuracy),
            evaluation: self.evaluation.clone(),
            artifacts: IndexMap::new(),
        }
    }

    fn check_consistency(&self) -> Result<(), ArtifactError> {
        let names = self.schema.names();
        if self.scaler.columns != names
            || self.scaler.means.len() != names.len()
            || self.scaler.stds.len() != names.len()
        {
            return Err(ArtifactError::corrupt(
                ArtifactKind::Scaler.name(),
                format!(
                    "fitted on columns {:?} but the schema declares {:?}",
                    self.scaler.columns, names
                ),
            ));
        }
        if self.scaler.stds.iter().any(|std| !std.is_finite() || *std <= 0.0)
            || self.scaler.means.iter().any(|mean| !mean.is_finite())
        {
            return Err(ArtifactError::corrupt(
                ArtifactKind::Scaler.name(),
                "non-finite or non-positive statistics",
            ));
        }
        if !self.encoders.is_complete() {
            return Err(ArtifactError::corrupt(
                ArtifactKind::Vocabularies.name(),
                format!("no vocabulary for {:?}", self.encoders.missing_fields()),
            ));
        }
        let labels = self.labels()?.len();
        if self.classifier.n_features() != names.len() || self.classifier.n_classes() != labels {
            return Err(ArtifactError::corrupt(
                ArtifactKind::Classifier.name(),
                format!(
                    "expects {} features and {} classes, bundle has {} and {labels}",
                    self.classifier.n_features(),
                    self.classifier.n_classes(),
                    names.len()
                ),
            ));
        }
        if !self.classifier.is_well_formed() {
            return Err(ArtifactError::corrupt(
                ArtifactKind::Classifier.name(),
                "malformed model structure",
            ));
        }
        Ok(())
    }

    fn envelope<T: Serialize>(&self, kind: ArtifactKind, payload: T) -> Result<Vec<u8>, ArtifactError> {
        let envelope = ArtifactEnvelope {
            format_version: FORMAT_VERSION,
            run_id: self.run_id.clone(),
            kind,
            payload,
        };
        serde_json::to_vec_pretty(&envelope)
            .map_err(|err| ArtifactError::corrupt(kind.name(), err.to_string()))
    }

    fn render(&self, kind: ArtifactKind) -> Result<Vec<u8>, ArtifactError> {
        match kind {
            ArtifactKind::Classifier => self.envelope(kind, &self.classifier),
            ArtifactKind::Scaler => self.envelope(kind, &self.scaler),
            ArtifactKind::Vocabularies => {
                let features: Vec<&CategoryVocabulary> = self.encoders.feature_vocabularies().collect();
                self.envelope(kind, features)
            }
            ArtifactKind::Schema => self.envelope(kind, &self.schema),
            ArtifactKind::Labels => self.envelope(kind, self.labels()?),
        }
    }

    /// Writes all artifacts, then the manifest, into an existing directory.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<BundleManifest, ArtifactError> {
        let dir = dir.as_ref();
        let mut manifest = self.manifest();
        for kind in ArtifactKind::ALL {
            let bytes = self.render(kind)?;
            write_synced(&dir.join(kind.file_name()), &bytes)?;
            manifest
                .artifacts
                .insert(kind.file_name().to_owned(), sha256_hex(&bytes));
        }
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| ArtifactError::corrupt("manifest", err.to_string()))?;
        write_synced(&dir.join(MANIFEST_FILE), &bytes)?;
        sync_dir(dir);
        Ok(manifest)
    }

    /// Reads and verifies a bundle directory.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref();
        let manifest_bytes = read_existing(&dir.join(MANIFEST_FILE), "manifest")?;
        for kind in ArtifactKind::ALL {
            let path = dir.join(kind.file_name());
            if !path.is_file() {
                return Err(ArtifactError::Missing {
                    artifact: kind.name().to_owned(),
                    path,
                });
            }
        }

        let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|err| ArtifactError::corrupt("manifest", err.to_string()))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(ArtifactError::corrupt(
                "manifest",
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let classifier: ClassifierModel = read_artifact(dir, &manifest, ArtifactKind::Classifier)?;
        let scaler: ScalerParameters = read_artifact(dir, &manifest, ArtifactKind::Scaler)?;
        let features: Vec<CategoryVocabulary> =
            read_artifact(dir, &manifest, ArtifactKind::Vocabularies)?;
        let schema: FeatureSchema = read_artifact(dir, &manifest, ArtifactKind::Schema)?;
        let labels: CategoryVocabulary = read_artifact(dir, &manifest, ArtifactKind::Labels)?;

        let encoders = EncoderSet::from_parts(&schema, features, labels).map_err(|err| {
            ArtifactError::corrupt(ArtifactKind::Vocabularies.name(), err.to_string())
        })?;
        let bundle = Self {
            run_id: manifest.run_id,
            created_at: manifest.created_at,
            evaluation: manifest.evaluation,
            schema,
            scaler,
            encoders,
            classifier,
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }
}

fn read_artifact<T: DeserializeOwned>(
    dir: &Path,
    manifest: &BundleManifest,
    kind: ArtifactKind,
) -> Result<T, ArtifactError> {
    let path = dir.join(kind.file_name());
    let bytes = read_existing(&path, kind.name())?;
    let expected = manifest
        .artifacts
        .get(kind.file_name())
        .ok_or_else(|| ArtifactError::corrupt(kind.name(), "not listed in the manifest"))?;
    if sha256_hex(&bytes) != *expected {
        return Err(ArtifactError::corrupt(kind.name(), "checksum mismatch"));
    }
    let envelope: ArtifactEnvelope<T> = serde_json::from_slice(&bytes)
        .map_err(|err| ArtifactError::corrupt(kind.name(), err.to_string()))?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(ArtifactError::corrupt(
            kind.name(),
            format!("unsupported format version {}", envelope.format_version),
        ));
    }
    if envelope.run_id != manifest.run_id {
        return Err(ArtifactError::corrupt(
            kind.name(),
            format!("belongs to run {} not {}", envelope.run_id, manifest.run_id),
        ));
    }
    if envelope.kind != kind {
        return Err(ArtifactError::corrupt(
            kind.name(),
            format!("file holds a {} artifact", envelope.kind.name()),
        ));
    }
    Ok(envelope.payload)
}

/// Directory of committed bundles: `runs/<run_id>/` plus a `LATEST` pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleStore {
    root: PathBuf,
}

impl BundleStore {
    /// Store rooted at `root` (created on first commit).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a committed run.
    #[must_use]
    pub fn bundle_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }

    /// Atomically publishes `bundle` and points `LATEST` at it.
    ///
    /// On failure nothing under `runs/` or `LATEST` changes.
    pub fn commit(&self, bundle: &ArtifactBundle) -> Result<PathBuf, ArtifactError> {
        let runs = self.root.join("runs");
        fs::create_dir_all(&runs).map_err(|err| ArtifactError::io(&runs, err))?;
        let target = self.bundle_dir(bundle.run_id());
        if target.exists() {
            return Err(ArtifactError::io(
                &target,
                io::Error::new(io::ErrorKind::AlreadyExists, "run already committed"),
            ));
        }

        let staging = self.root.join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir(&staging).map_err(|err| ArtifactError::io(&staging, err))?;
        let published = bundle
            .save(&staging)
            .and_then(|_| fs::rename(&staging, &target).map_err(|err| ArtifactError::io(&target, err)));
        if let Err(err) = published {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
        sync_dir(&runs);

        let pointer = self.root.join(format!(".{LATEST_FILE}-{}.tmp", Uuid::new_v4()));
        write_synced(&pointer, format!("{}\n", bundle.run_id()).as_bytes())?;
        let latest = self.root.join(LATEST_FILE);
        fs::rename(&pointer, &latest).map_err(|err| {
            let _ = fs::remove_file(&pointer);
            ArtifactError::io(&latest, err)
        })?;
        sync_dir(&self.root);
        Ok(target)
    }

    /// Run id named by `LATEST`, if any run was committed.
    pub fn latest(&self) -> Result<Option<String>, ArtifactError> {
        let path = self.root.join(LATEST_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let run_id = raw.trim();
                if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
                    return Err(ArtifactError::corrupt(
                        LATEST_FILE,
                        format!("invalid run id `{run_id}`"),
                    ));
                }
                Ok(Some(run_id.to_owned()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ArtifactError::io(path, err)),
        }
    }

    /// Committed run ids, oldest first.
    pub fn list_runs(&self) -> Result<Vec<String>, ArtifactError> {
        let runs = self.root.join("runs");
        let entries = match fs::read_dir(&runs) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ArtifactError::io(runs, err)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ArtifactError::io(&runs, err))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Maps a location to a bundle directory.
    ///
    /// A directory holding `bundle.json` is used as-is; a store root is
    /// followed through its `LATEST` pointer.
    pub fn resolve(location: impl AsRef<Path>) -> Result<PathBuf, ArtifactError> {
        let location = location.as_ref();
        if location.join(MANIFEST_FILE).is_file() {
            return Ok(location.to_path_buf());
        }
        let store = Self::new(location);
        match store.latest()? {
            Some(run_id) => Ok(store.bundle_dir(&run_id)),
            None => Err(ArtifactError::Missing {
                artifact: "manifest".into(),
                path: location.join(MANIFEST_FILE),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        classifier::NearestCentroid,
        config::TrainingConfig,
        schema::TARGET_FIELD,
    };
    use ndarray::Array2;
    use serde_json::Value;
    use tempfile::tempdir;

    pub(crate) fn sample_bundle(run_id: &str) -> ArtifactBundle {
        let schema = FeatureSchema::standard();
        let config = TrainingConfig::default();
        let mut encoders = EncoderSet::for_schema(&schema, TARGET_FIELD);
        for (field, values) in &config.vocabularies {
            encoders.fit(field, values.iter().cloned()).unwrap();
        }
        let scaler = ScalerParameters {
            columns: schema.names(),
            means: vec![0.0; 12],
            stds: vec![1.0; 12],
        };
        let x = Array2::from_shape_fn((3, 12), |(row, col)| (row * 10 + col) as f64);
        let classifier = ClassifierModel::NearestCentroid(
            NearestCentroid::fit(x.view(), &[0, 1, 2], 3).unwrap(),
        );
        ArtifactBundle::new(run_id, schema, scaler, encoders, classifier, None).unwrap()
    }

    fn rewrite_manifest(dir: &Path, edit: impl FnOnce(&mut Value)) {
        let path = dir.join(MANIFEST_FILE);
        let mut manifest: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        edit(&mut manifest);
        fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    }

    #[test]
    fn save_then_load_restores_every_part() {
        let tmp = tempdir().unwrap();
        let bundle = sample_bundle("run-a");
        let manifest = bundle.save(tmp.path()).unwrap();
        assert_eq!(manifest.artifacts.len(), 5);
        let loaded = ArtifactBundle::load(tmp.path()).unwrap();
        assert_eq!(loaded.run_id(), "run-a");
        assert_eq!(loaded.schema(), bundle.schema());
        assert_eq!(loaded.scaler(), bundle.scaler());
        assert_eq!(loaded.encoders(), bundle.encoders());
        assert_eq!(loaded.classifier(), bundle.classifier());
    }

    #[test]
    fn missing_scaler_is_reported() {
        let tmp = tempdir().unwrap();
        sample_bundle("run-a").save(tmp.path()).unwrap();
        fs::remove_file(tmp.path().join("scaler.json")).unwrap();
        let err = ArtifactBundle::load(tmp.path()).unwrap_err();
        assert!(
            matches!(&err, ArtifactError::Missing { artifact, .. } if artifact == "scaler"),
            "{err}"
        );
    }

    #[test]
    fn tampered_artifact_fails_checksum() {
        let tmp = tempdir().unwrap();
        sample_bundle("run-a").save(tmp.path()).unwrap();
        let path = tmp.path().join("labels.json");
        let tampered = fs::read_to_string(&path).unwrap().replace("Insomnia", "Insomnio");
        fs::write(&path, tampered).unwrap();
        let err = ArtifactBundle::load(tmp.path()).unwrap_err();
        assert!(
            matches!(&err, ArtifactError::Corrupt { artifact, reason } if artifact == "labels" && reason.contains("checksum")),
            "{err}"
        );
    }

    #[test]
    fn artifact_from_another_run_is_rejected() {
        let tmp = tempdir().unwrap();
        let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        sample_bundle("run-a").save(&a).unwrap();
        sample_bundle("run-b").save(&b).unwrap();
        let foreign = fs::read(b.join("scaler.json")).unwrap();
        fs::write(a.join("scaler.json"), &foreign).unwrap();
        rewrite_manifest(&a, |manifest| {
            manifest["artifacts"]["scaler.json"] = Value::String(sha256_hex(&foreign));
        });
        let err = ArtifactBundle::load(&a).unwrap_err();
        assert!(
            matches!(&err, ArtifactError::Corrupt { reason, .. } if reason.contains("run-b")),
            "{err}"
        );
    }

    #[test]
    fn unsupported_version_is_corrupt() {
        let tmp = tempdir().unwrap();
        sample_bundle("run-a").save(tmp.path()).unwrap();
        rewrite_manifest(tmp.path(), |manifest| manifest["format_version"] = Value::from(99));
        assert!(matches!(
            ArtifactBundle::load(tmp.path()),
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[test]
    fn scaler_schema_mismatch_is_refused() {
        let bundle = sample_bundle("run-a");
        let mut scaler = bundle.scaler().clone();
        scaler.columns.swap(0, 1);
        let err = ArtifactBundle::new(
            "run-a",
            bundle.schema().clone(),
            scaler,
            bundle.encoders().clone(),
            bundle.classifier().clone(),
            None,
        )
        .unwrap_err();
        assert!(matches!(&err, ArtifactError::Corrupt { artifact, .. } if artifact == "scaler"));
    }

    #[test]
    fn store_commits_and_resolves_latest() {
        let tmp = tempdir().unwrap();
        let store = BundleStore::new(tmp.path().join("store"));
        assert!(matches!(
            BundleStore::resolve(store.root()),
            Err(ArtifactError::Missing { .. })
        ));
        let first = store.commit(&sample_bundle("20260101T000000Z-aaaa")).unwrap();
        let second = store.commit(&sample_bundle("20260102T000000Z-bbbb")).unwrap();
        assert_eq!(store.latest().unwrap().as_deref(), Some("20260102T000000Z-bbbb"));
        assert_eq!(BundleStore::resolve(store.root()).unwrap(), second);
        assert_eq!(BundleStore::resolve(&first).unwrap(), first);
        assert_eq!(store.list_runs().unwrap().len(), 2);
        let leftovers = fs::read_dir(store.root())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn failed_commit_leaves_store_untouched() {
        let tmp = tempdir().unwrap();
        let store = BundleStore::new(tmp.path());
        store.commit(&sample_bundle("run-a")).unwrap();
        assert!(store.commit(&sample_bundle("run-a")).is_err());
        assert_eq!(store.latest().unwrap().as_deref(), Some("run-a"));
        assert_eq!(store.list_runs().unwrap(), vec!["run-a".to_owned()]);
        assert!(ArtifactBundle::load(store.bundle_dir("run-a")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn rename_failure_after_staging_cleans_up() {
        let tmp = tempdir().unwrap();
        let store = BundleStore::new(tmp.path());
        store.commit(&sample_bundle("run-a")).unwrap();

        // Dangling link: passes the existence check, then the directory rename onto it fails.
        std::os::unix::fs::symlink(tmp.path().join("nowhere"), store.bundle_dir("run-b")).unwrap();
        let err = store.commit(&sample_bundle("run-b")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }), "{err:?}");

        let leftovers: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        assert_eq!(store.latest().unwrap().as_deref(), Some("run-a"));
        assert_eq!(store.list_runs().unwrap(), vec!["run-a".to_owned()]);
        assert!(ArtifactBundle::load(store.bundle_dir("run-a")).is_ok());
    }
}
