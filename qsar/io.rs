// ========================================================================================
//
//                       FILE FORMATS: DATASETS, MANIFESTS, RESULTS
//
// ========================================================================================
//
// Everything that touches the filesystem lives here, so the assembly, augmentation
// and cross-validation modules can stay pure.
//
//   - Per-target dataset: CSV with a header. First column molecule identifier,
//     last column activity label, everything in between a numeric feature.
//   - Group manifest: one dataset filename per line. The target identifier is the
//     filename without its last extension; the group name is the manifest's own
//     file stem.
//   - Feature selection: `targetId,i,j,k,...` per line, 0-based feature indices.
//   - Prediction output: one CSV row per test-fold prediction. Files are staged
//     under unique temporary names and only renamed into place once every file
//     of the group is fully written.

use crate::assemble::DatasetSource;
use crate::cv::PredictionRecord;
use crate::dataset::{Dataset, DatasetError};
use crate::similarity::{delimited_reader, record_fields, record_line};
use ahash::AHashMap;
use ahash::AHashSet;
use ndarray::{Array1, Array2};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error(
        "'{path}' has {found} columns; a dataset needs an identifier, at least one feature and a label."
    )]
    TooFewColumns { path: String, found: usize },
    #[error("'{path}' line {line}: column '{column}' holds non-numeric value '{value}'.")]
    NotNumeric {
        path: String,
        line: usize,
        column: String,
        value: String,
    },
    #[error("'{path}' line {line}: column '{column}' holds a non-finite value.")]
    NonFinite {
        path: String,
        line: usize,
        column: String,
    },
    #[error("Manifest '{path}' does not list any datasets.")]
    EmptyManifest { path: String },
    #[error("No dataset is available for target '{0}'.")]
    UnknownTarget(String),
    #[error("Feature-selection line {line}: {message}")]
    FeatureSelection { line: usize, message: String },
    #[error("Dataset '{origin}' is invalid: {source}")]
    Dataset {
        origin: String,
        #[source]
        source: DatasetError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DataError + '_ {
    move |source| DataError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ========================================================================================
//                                 PER-TARGET DATASETS
// ========================================================================================

pub fn read_dataset(path: &Path) -> Result<Dataset, DataError> {
    let file = File::open(path).map_err(io_error(path))?;
    read_dataset_from_reader(file, &path.display().to_string())
}

/// Parses a dataset from any reader. `origin` names the source in error messages.
pub fn read_dataset_from_reader<R: Read>(reader: R, origin: &str) -> Result<Dataset, DataError> {
    let csv_error = |source: csv::Error| DataError::Csv {
        path: origin.to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.len() < 3 {
        return Err(DataError::TooFewColumns {
            path: origin.to_string(),
            found: headers.len(),
        });
    }
    let last = headers.len() - 1;

    let mut molecule_ids = Vec::new();
    let mut features = Vec::new();
    let mut labels = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        // Header is line 1.
        let line = index + 2;
        molecule_ids.push(record[0].to_string());
        for column in 1..=last {
            let raw = &record[column];
            let value: f64 = raw.parse().map_err(|_| DataError::NotNumeric {
                path: origin.to_string(),
                line,
                column: headers[column].clone(),
                value: raw.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFinite {
                    path: origin.to_string(),
                    line,
                    column: headers[column].clone(),
                });
            }
            if column == last {
                labels.push(value);
            } else {
                features.push(value);
            }
        }
    }

    let mut seen = AHashSet::with_capacity(molecule_ids.len());
    for id in &molecule_ids {
        if !seen.insert(id.as_str()) {
            log::warn!("'{origin}' lists molecule '{id}' more than once");
        }
    }

    let dataset_error = |source: DatasetError| DataError::Dataset {
        origin: origin.to_string(),
        source,
    };
    let rows = labels.len();
    let matrix = Array2::from_shape_vec((rows, last - 1), features).map_err(|_| {
        dataset_error(DatasetError::RowCountMismatch {
            ids: molecule_ids.len(),
            rows,
            labels: rows,
        })
    })?;
    Dataset::new(
        headers[0].clone(),
        headers[1..last].to_vec(),
        headers[last].clone(),
        molecule_ids,
        matrix,
        Array1::from_vec(labels),
    )
    .map_err(dataset_error)
}

/// Writes a dataset as CSV with a trailing `weight` column.
pub fn write_weighted<W: Write>(writer: W, dataset: &Dataset) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    let mut header = Vec::with_capacity(dataset.width() + 3);
    header.push(dataset.id_column().to_string());
    header.extend(dataset.feature_names().iter().cloned());
    header.push(dataset.label_name().to_string());
    header.push("weight".to_string());
    writer.write_record(&header)?;
    for row in dataset.rows() {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.molecule_id.to_string());
        record.extend(row.features.iter().map(f64::to_string));
        record.push(row.label.to_string());
        record.push(row.weight.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a weighted dataset to `path`, all or nothing.
pub fn write_weighted_dataset(path: &Path, dataset: &Dataset) -> Result<(), DataError> {
    let mut outputs = StagedOutputs::new();
    outputs.weighted_dataset(path, dataset)?;
    outputs.commit().map(drop)
}

/// Loads `<dir>/<target_id>.<extension>`.
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    dir: PathBuf,
    extension: String,
}

impl CsvDirectory {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn path_for(&self, target_id: &str) -> PathBuf {
        self.dir.join(format!("{target_id}.{}", self.extension))
    }
}

impl DatasetSource for CsvDirectory {
    fn load(&self, target_id: &str) -> Result<Dataset, DataError> {
        let path = self.path_for(target_id);
        log::debug!("Loading dataset for target {target_id} from {}", path.display());
        read_dataset(&path)
    }
}

// ========================================================================================
//                                   GROUP MANIFESTS
// ========================================================================================

/// An ordered list of targets forming one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupManifest {
    pub name: String,
    pub target_ids: Vec<String>,
}

/// Strips the last extension: `CHEMBL240.csv` becomes `CHEMBL240`. A name that
/// ends in a bare dot, or has no dot, is returned unchanged.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() => &name[..dot],
        _ => name,
    }
}

pub fn read_manifest(path: &Path) -> Result<GroupManifest, DataError> {
    let file = File::open(path).map_err(io_error(path))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut target_ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_error(path))?;
        let entry = line.trim();
        if entry.is_empty() {
            continue;
        }
        target_ids.push(strip_extension(entry).to_string());
    }
    if target_ids.is_empty() {
        return Err(DataError::EmptyManifest {
            path: path.display().to_string(),
        });
    }
    Ok(GroupManifest {
        name: strip_extension(&file_name).to_string(),
        target_ids,
    })
}

/// Lists files in `dir` whose name ends with `.extension` (case-insensitive), in
/// natural sort order.
pub fn discover_manifests(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, DataError> {
    let suffix = format!(".{}", extension.to_lowercase());
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let is_match = path.is_file()
            && path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase().ends_with(&suffix))
                .unwrap_or(false);
        if is_match {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| {
        natord::compare(
            &a.file_name().unwrap_or_default().to_string_lossy(),
            &b.file_name().unwrap_or_default().to_string_lossy(),
        )
    });
    log::debug!("Found {} manifests in {}", paths.len(), dir.display());
    Ok(paths)
}

// ========================================================================================
//                                  FEATURE SELECTION
// ========================================================================================

/// Per-target lists of feature columns to keep.
#[derive(Debug, Clone, Default)]
pub struct FeatureSelection {
    by_target: AHashMap<String, Vec<usize>>,
}

impl FeatureSelection {
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let file = File::open(path).map_err(io_error(path))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut by_target = AHashMap::new();
        let mut reader = delimited_reader(reader, false);
        for record in reader.records() {
            let record = record.map_err(|e| DataError::FeatureSelection {
                line: e.position().map_or(0, |p| p.line() as usize),
                message: e.to_string(),
            })?;
            let line_no = record_line(&record);
            let fields = record_fields(&record);
            let Some((target, indices)) = fields.split_first() else {
                continue;
            };
            let indices = indices
                .iter()
                .map(|raw| {
                    raw.parse::<usize>().map_err(|_| DataError::FeatureSelection {
                        line: line_no,
                        message: format!("'{raw}' is not a feature index"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if by_target.insert(target.to_string(), indices).is_some() {
                log::warn!("Feature selection for target {target} redefined on line {line_no}");
            }
        }
        Ok(Self { by_target })
    }

    pub fn features_for(&self, target_id: &str) -> Option<&[usize]> {
        self.by_target.get(target_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}

/// A [`DatasetSource`] that applies a [`FeatureSelection`] to every dataset it loads.
pub struct SelectedFeatures<'a, S: ?Sized> {
    inner: &'a S,
    selection: &'a FeatureSelection,
}

impl<'a, S: DatasetSource + ?Sized> SelectedFeatures<'a, S> {
    pub fn new(inner: &'a S, selection: &'a FeatureSelection) -> Self {
        Self { inner, selection }
    }
}

impl<S: DatasetSource + ?Sized> DatasetSource for SelectedFeatures<'_, S> {
    fn load(&self, target_id: &str) -> Result<Dataset, DataError> {
        let dataset = self.inner.load(target_id)?;
        match self.selection.features_for(target_id) {
            Some(indices) => dataset
                .select_features(indices)
                .map_err(|source| DataError::Dataset {
                    origin: target_id.to_string(),
                    source,
                }),
            None => Ok(dataset),
        }
    }
}

// ========================================================================================
//                                  PREDICTION OUTPUT
// ========================================================================================

/// Column layout of a prediction file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// `fold,organism_tid,row_id,actual,prediction`
    Grouped,
    /// `rep,fold,organism_tid,row_id,actual,prediction`
    Repeated(usize),
    /// `rep,fold,row_id,actual,prediction`
    SingleTask(usize),
}

impl RecordLayout {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            RecordLayout::Grouped => &["fold", "organism_tid", "row_id", "actual", "prediction"],
            RecordLayout::Repeated(_) => &[
                "rep",
                "fold",
                "organism_tid",
                "row_id",
                "actual",
                "prediction",
            ],
            RecordLayout::SingleTask(_) => &["rep", "fold", "row_id", "actual", "prediction"],
        }
    }

    fn fields(&self, record: &PredictionRecord) -> Vec<String> {
        let tail = [
            record.molecule_id.clone(),
            record.actual.to_string(),
            record.predicted.to_string(),
        ];
        let mut fields = Vec::with_capacity(6);
        match *self {
            RecordLayout::Grouped => {
                fields.push(record.fold.to_string());
                fields.push(record.target_id.clone());
            }
            RecordLayout::Repeated(rep) => {
                fields.push(rep.to_string());
                fields.push(record.fold.to_string());
                fields.push(record.target_id.clone());
            }
            RecordLayout::SingleTask(rep) => {
                fields.push(rep.to_string());
                fields.push(record.fold.to_string());
            }
        }
        fields.extend(tail);
        fields
    }
}

/// Writes prediction records as CSV to any writer.
pub fn write_predictions<W: Write>(
    writer: W,
    records: &[PredictionRecord],
    layout: RecordLayout,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(layout.header())?;
    for record in records {
        writer.write_record(layout.fields(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes prediction records to `path`. Nothing appears at `path` unless every
/// record was written.
pub fn write_predictions_file(
    path: &Path,
    records: &[PredictionRecord],
    layout: RecordLayout,
) -> Result<(), DataError> {
    let mut outputs = StagedOutputs::new();
    outputs.predictions(path, records, layout)?;
    outputs.commit().map(drop)
}

/// Output files written to uniquely named temporary files beside their
/// destinations and moved into place together by [`StagedOutputs::commit`].
/// Dropping an uncommitted set deletes every staged file.
#[derive(Debug, Default)]
pub struct StagedOutputs {
    staged: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn stage<F>(&mut self, path: &Path, write: F) -> Result<(), DataError>
    where
        F: FnOnce(&mut File) -> Result<(), csv::Error>,
    {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(io_error(path))?;
        write(staging.as_file_mut()).map_err(|source| DataError::Csv {
            path: path.display().to_string(),
            source,
        })?;
        staging.as_file().sync_all().map_err(io_error(path))?;
        self.staged.push((staging, path.to_path_buf()));
        Ok(())
    }

    pub fn predictions(
        &mut self,
        path: &Path,
        records: &[PredictionRecord],
        layout: RecordLayout,
    ) -> Result<(), DataError> {
        self.stage(path, |file| write_predictions(file, records, layout))
    }

    pub fn weighted_dataset(&mut self, path: &Path, dataset: &Dataset) -> Result<(), DataError> {
        self.stage(path, |file| write_weighted(file, dataset))
    }

    /// Moves every staged file to its destination and returns the destinations.
    /// If a move fails, files already moved are removed and the rest discarded.
    pub fn commit(self) -> Result<Vec<PathBuf>, DataError> {
        let mut committed: Vec<PathBuf> = Vec::with_capacity(self.staged.len());
        for (staging, path) in self.staged {
            if let Err(e) = staging.persist(&path) {
                for done in &committed {
                    let _ = fs::remove_file(done);
                }
                return Err(DataError::Io {
                    path: path.display().to_string(),
                    source: e.error,
                });
            }
            committed.push(path);
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;
    use tempfile::tempdir;

    const DATASET: &str = "\
MOLECULE_CHEMBL_ID,b0,b1,b2,pchembl_value
CHEMBL1,1,0,1,6.5
CHEMBL2,0,0,1,5.0
CHEMBL3,1,1,1,7.25
";

    #[test]
    fn reads_identifier_features_and_label() {
        let data = read_dataset_from_reader(Cursor::new(DATASET), "mem").unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.width(), 3);
        assert_eq!(data.id_column(), "MOLECULE_CHEMBL_ID");
        assert_eq!(data.label_name(), "pchembl_value");
        assert_eq!(data.molecule_ids()[2], "CHEMBL3");
        assert_abs_diff_eq!(data.features()[[0, 2]], 1.0);
        assert_abs_diff_eq!(data.labels()[2], 7.25);
    }

    #[test]
    fn rejects_non_numeric_cells_with_location() {
        let text = "id,f,y\nm1,1,?\n";
        match read_dataset_from_reader(Cursor::new(text), "mem").unwrap_err() {
            DataError::NotNumeric {
                line,
                column,
                value,
                ..
            } => {
                assert_eq!(line, 2);
                assert_eq!(column, "y");
                assert_eq!(value, "?");
            }
            other => panic!("Expected NotNumeric, got {other:?}"),
        }
    }

    #[test]
    fn rejects_too_few_columns_and_ragged_rows() {
        assert!(matches!(
            read_dataset_from_reader(Cursor::new("id,y\nm1,1\n"), "mem"),
            Err(DataError::TooFewColumns { found: 2, .. })
        ));
        assert!(matches!(
            read_dataset_from_reader(Cursor::new("id,f,y\nm1,1\n"), "mem"),
            Err(DataError::Csv { .. })
        ));
    }

    #[test]
    fn strip_extension_matches_last_dot_only() {
        assert_eq!(strip_extension("CHEMBL240.csv"), "CHEMBL240");
        assert_eq!(strip_extension("a.b.csv"), "a.b");
        assert_eq!(strip_extension("plain"), "plain");
        assert_eq!(strip_extension("trailing."), "trailing.");
    }

    #[test]
    fn manifests_are_discovered_in_natural_order() {
        let dir = tempdir().unwrap();
        for name in ["group10.txt", "group2.TXT", "group1.txt", "notes.md"] {
            fs::write(dir.path().join(name), "CHEMBL1.csv\n").unwrap();
        }
        let found: Vec<String> = discover_manifests(dir.path(), "txt")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["group1.txt", "group2.TXT", "group10.txt"]);
    }

    #[test]
    fn manifest_lines_become_target_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Kinases.txt");
        fs::write(&path, "CHEMBL240.csv\r\n\nCHEMBL203.csv\n").unwrap();
        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.name, "Kinases");
        assert_eq!(manifest.target_ids, vec!["CHEMBL240", "CHEMBL203"]);

        let empty = dir.path().join("Empty.txt");
        fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(
            read_manifest(&empty),
            Err(DataError::EmptyManifest { .. })
        ));
    }

    #[test]
    fn feature_selection_filters_loaded_datasets() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("T1.csv"), DATASET).unwrap();
        let source = CsvDirectory::new(dir.path(), "csv");
        let selection = FeatureSelection::from_reader(Cursor::new("T1,2,0\nT9,1\n")).unwrap();
        assert_eq!(selection.len(), 2);
        assert_eq!(selection.features_for("T1"), Some(&[2, 0][..]));

        let filtered = SelectedFeatures::new(&source, &selection);
        let data = filtered.load("T1").unwrap();
        assert_eq!(data.feature_names(), &["b2".to_string(), "b0".to_string()]);
        assert!(matches!(
            filtered.load("T2"),
            Err(DataError::Io { .. })
        ));

        let quoted = FeatureSelection::from_reader(Cursor::new("\"T1\", 1 ,0,\n")).unwrap();
        assert_eq!(quoted.features_for("T1"), Some(&[1, 0][..]));

        let err = FeatureSelection::from_reader(Cursor::new("T1,0\nT2,x\n")).unwrap_err();
        assert!(matches!(err, DataError::FeatureSelection { line: 2, .. }));
    }

    #[test]
    fn prediction_layouts() {
        let records = vec![PredictionRecord {
            fold: 3,
            target_id: "T1".into(),
            molecule_id: "CHEMBL9".into(),
            actual: 6.5,
            predicted: 6.0,
        }];
        let mut out = Vec::new();
        write_predictions(&mut out, &records, RecordLayout::Grouped).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "fold,organism_tid,row_id,actual,prediction\n3,T1,CHEMBL9,6.5,6\n"
        );

        let mut out = Vec::new();
        write_predictions(&mut out, &records, RecordLayout::Repeated(1)).unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .ends_with("1,3,T1,CHEMBL9,6.5,6\n"));

        let mut out = Vec::new();
        write_predictions(&mut out, &records, RecordLayout::SingleTask(2)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "rep,fold,row_id,actual,prediction\n2,3,CHEMBL9,6.5,6\n"
        );
    }

    #[test]
    fn prediction_file_is_committed_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MTL_g.csv");
        write_predictions_file(&path, &[], RecordLayout::Grouped).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let missing_dir = dir.path().join("absent").join("MTL_g.csv");
        assert!(write_predictions_file(&missing_dir, &[], RecordLayout::Grouped).is_err());
        assert!(!missing_dir.exists());
    }

    #[test]
    fn staged_outputs_appear_only_on_commit() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("STL_g_T1.csv");
        let second = dir.path().join("STL_g_T2.csv");

        let mut abandoned = StagedOutputs::new();
        abandoned
            .predictions(&first, &[], RecordLayout::SingleTask(1))
            .unwrap();
        assert_eq!(abandoned.len(), 1);
        assert!(!first.exists());
        drop(abandoned);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // Two writers staging the same destination never share a staging file.
        let mut a = StagedOutputs::new();
        let mut b = StagedOutputs::new();
        a.stage(&first, |file| {
            file.write_all(b"a\n")?;
            Ok(())
        })
        .unwrap();
        b.stage(&first, |file| {
            file.write_all(b"b\n")?;
            Ok(())
        })
        .unwrap();
        a.predictions(&second, &[], RecordLayout::SingleTask(1))
            .unwrap();
        assert_eq!(a.commit().unwrap(), vec![first.clone(), second.clone()]);
        assert_eq!(fs::read_to_string(&first).unwrap(), "a\n");
        b.commit().unwrap();
        assert_eq!(fs::read_to_string(&first).unwrap(), "b\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn weighted_dataset_round_trips_through_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TL_T1.csv");
        let data = read_dataset_from_reader(Cursor::new(DATASET), "mem").unwrap();
        write_weighted_dataset(&path, &data).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("MOLECULE_CHEMBL_ID,b0,b1,b2,pchembl_value,weight\n"));
        assert!(text.contains("CHEMBL3,1,1,1,7.25,1\n"));
    }
}
