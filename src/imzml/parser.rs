//! Streaming imzML header parser using quick-xml.
//!
//! imzML is an mzML dialect where spectra carry no inline base64 payload;
//! instead each `binaryDataArray` declares an external byte offset and
//! element count pointing into a companion `.ibd` file. This parser walks
//! the header once, start to finish, and produces a single immutable
//! [`Dataset`] holding every pixel's offsets plus the dataset-wide facts
//! (layout mode, dtypes, grid size, UUID).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::ImzMLError;
use super::models::{DataType, Dataset, LayoutMode, SpectrumRecord};

/// IMS controlled-vocabulary accessions consumed by the parser.
pub mod ims_terms {
    /// Continuous binary layout marker
    pub const CONTINUOUS: &str = "IMS:1000030";
    /// Processed binary layout marker
    pub const PROCESSED: &str = "IMS:1000031";
    /// Universally unique identifier of the payload file
    pub const UUID: &str = "IMS:1000080";
    /// Max count of pixels x
    pub const MAX_PIXELS_X: &str = "IMS:1000042";
    /// Max count of pixels y
    pub const MAX_PIXELS_Y: &str = "IMS:1000043";
    /// Pixel position x (1-based)
    pub const POSITION_X: &str = "IMS:1000050";
    /// Pixel position y (1-based)
    pub const POSITION_Y: &str = "IMS:1000051";
    /// Pixel position z (1-based)
    pub const POSITION_Z: &str = "IMS:1000052";
    /// External byte offset into the .ibd file
    pub const EXTERNAL_OFFSET: &str = "IMS:1000102";
    /// External array length (element count)
    pub const EXTERNAL_ARRAY_LENGTH: &str = "IMS:1000103";
}

/// MS accessions identifying the two binary array kinds.
const MZ_ARRAY: &str = "MS:1000514";
const INTENSITY_ARRAY: &str = "MS:1000515";

/// Default input buffer size for header parsing (64KB)
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 64 * 1024;

/// Parse an imzML header into a [`Dataset`].
///
/// The payload file is not touched; only offsets and lengths are recorded.
pub fn parse_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset, ImzMLError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(DEFAULT_INPUT_BUFFER_SIZE, file);
    let mut parser = HeaderParser::new(reader);
    parser.run()?;
    parser.finish(path)
}

/// Minimal cvParam view: only accession and value matter here.
#[derive(Debug, Clone)]
struct CvParam {
    accession: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayKind {
    Mz,
    Intensity,
}

/// Per-`binaryDataArray` accumulator.
#[derive(Debug, Clone, Default)]
struct ArrayScope {
    kind: Option<ArrayKind>,
    dtype: Option<DataType>,
    offset: Option<u64>,
    length: Option<usize>,
}

/// Per-`spectrum` accumulator.
#[derive(Debug, Default)]
struct SpectrumScope {
    x: Option<usize>,
    y: Option<usize>,
    z: Option<usize>,
    arrays: Vec<ArrayScope>,
}

struct HeaderParser<R: BufRead> {
    reader: Reader<R>,
    /// referenceableParamGroup id -> its cvParams (dtype/kind declarations
    /// are usually factored out into these groups)
    param_groups: HashMap<String, Vec<CvParam>>,
    current_group: Option<String>,
    spectrum: Option<SpectrumScope>,
    in_binary_array: bool,
    continuous: bool,
    processed: bool,
    uuid: Option<String>,
    max_x: Option<usize>,
    max_y: Option<usize>,
    mz_dtype: Option<DataType>,
    intensity_dtype: Option<DataType>,
    records: Vec<SpectrumRecord>,
}

impl<R: BufRead> HeaderParser<R> {
    fn new(reader: R) -> Self {
        let mut xml_reader = Reader::from_reader(reader);
        xml_reader.config_mut().trim_text(true);

        Self {
            reader: xml_reader,
            param_groups: HashMap::new(),
            current_group: None,
            spectrum: None,
            in_binary_array: false,
            continuous: false,
            processed: false,
            uuid: None,
            max_x: None,
            max_y: None,
            mz_dtype: None,
            intensity_dtype: None,
            records: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<(), ImzMLError> {
        let mut buf = Vec::new();
        loop {
            match self.reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => self.handle_start(e)?,
                Ok(Event::Empty(ref e)) => self.handle_empty(e)?,
                Ok(Event::End(ref e)) => match e.name().as_ref() {
                    b"referenceableParamGroup" => self.current_group = None,
                    b"binaryDataArray" => self.in_binary_array = false,
                    b"spectrum" => self.finish_spectrum()?,
                    _ => {}
                },
                Ok(Event::Eof) => return Ok(()),
                Err(e) => return Err(ImzMLError::XmlError(e)),
                _ => {}
            }
            buf.clear();
        }
    }

    fn handle_start(&mut self, e: &BytesStart) -> Result<(), ImzMLError> {
        match e.name().as_ref() {
            b"referenceableParamGroup" => {
                let id = get_attribute(e, "id")?.ok_or_else(|| {
                    ImzMLError::InvalidStructure(
                        "referenceableParamGroup without id".to_string(),
                    )
                })?;
                self.param_groups.insert(id.clone(), Vec::new());
                self.current_group = Some(id);
            }
            b"spectrum" => {
                self.spectrum = Some(SpectrumScope::default());
            }
            b"binaryDataArray" => {
                self.in_binary_array = true;
                if let Some(ref mut scope) = self.spectrum {
                    scope.arrays.push(ArrayScope::default());
                }
            }
            b"cvParam" => {
                let cv = parse_cv_param(e)?;
                self.apply_cv_param(&cv);
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_empty(&mut self, e: &BytesStart) -> Result<(), ImzMLError> {
        match e.name().as_ref() {
            b"cvParam" => {
                let cv = parse_cv_param(e)?;
                self.apply_cv_param(&cv);
            }
            b"referenceableParamGroupRef" => {
                if let Some(id) = get_attribute(e, "ref")? {
                    self.resolve_group_ref(&id);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Replay a referenced param group's cvParams in the current context.
    fn resolve_group_ref(&mut self, id: &str) {
        if let Some(params) = self.param_groups.get(id).cloned() {
            for cv in &params {
                self.apply_cv_param(cv);
            }
        } else {
            warn!("unresolved referenceableParamGroupRef: {id}");
        }
    }

    fn apply_cv_param(&mut self, cv: &CvParam) {
        if let Some(id) = self.current_group.clone() {
            if let Some(params) = self.param_groups.get_mut(&id) {
                params.push(cv.clone());
            }
            return;
        }

        if self.in_binary_array {
            let array = self
                .spectrum
                .as_mut()
                .and_then(|scope| scope.arrays.last_mut());
            if let Some(array) = array {
                Self::apply_array_cv_param(array, cv);
            }
            return;
        }

        if let Some(ref mut scope) = self.spectrum {
            match cv.accession.as_str() {
                ims_terms::POSITION_X => scope.x = cv_value(cv),
                ims_terms::POSITION_Y => scope.y = cv_value(cv),
                ims_terms::POSITION_Z => scope.z = cv_value(cv),
                _ => {}
            }
            return;
        }

        match cv.accession.as_str() {
            ims_terms::CONTINUOUS => self.continuous = true,
            ims_terms::PROCESSED => self.processed = true,
            ims_terms::UUID => self.uuid = cv.value.clone(),
            ims_terms::MAX_PIXELS_X => self.max_x = cv_value(cv),
            ims_terms::MAX_PIXELS_Y => self.max_y = cv_value(cv),
            _ => {}
        }
    }

    fn apply_array_cv_param(array: &mut ArrayScope, cv: &CvParam) {
        match cv.accession.as_str() {
            MZ_ARRAY => array.kind = Some(ArrayKind::Mz),
            INTENSITY_ARRAY => array.kind = Some(ArrayKind::Intensity),
            ims_terms::EXTERNAL_OFFSET => array.offset = cv_value(cv),
            ims_terms::EXTERNAL_ARRAY_LENGTH => array.length = cv_value(cv),
            other => {
                if let Some(dtype) = DataType::from_cv_accession(other) {
                    array.dtype = Some(dtype);
                }
            }
        }
    }

    fn finish_spectrum(&mut self) -> Result<(), ImzMLError> {
        let scope = match self.spectrum.take() {
            Some(scope) => scope,
            None => return Ok(()),
        };
        let index = self.records.len();

        let x = scope.x.ok_or_else(|| missing(index, "position x"))?;
        let y = scope.y.ok_or_else(|| missing(index, "position y"))?;
        let z = scope.z.unwrap_or(1);

        // header coordinates are 1-based
        let (x, y, z) = match (x.checked_sub(1), y.checked_sub(1), z.checked_sub(1)) {
            (Some(x), Some(y), Some(z)) => (x, y, z),
            _ => {
                return Err(ImzMLError::InvalidStructure(format!(
                    "spectrum {index}: 0 is not a valid 1-based position"
                )))
            }
        };

        let mut mz: Option<ArrayScope> = None;
        let mut intensity: Option<ArrayScope> = None;
        for array in scope.arrays {
            match array.kind {
                Some(ArrayKind::Mz) => mz = Some(array),
                Some(ArrayKind::Intensity) => intensity = Some(array),
                None => {
                    return Err(ImzMLError::InvalidStructure(format!(
                        "spectrum {index}: binaryDataArray with unknown kind"
                    )))
                }
            }
        }
        let mz = mz.ok_or_else(|| missing(index, "m/z array"))?;
        let intensity = intensity.ok_or_else(|| missing(index, "intensity array"))?;

        if let Some(dtype) = mz.dtype {
            self.mz_dtype.get_or_insert(dtype);
        }
        if let Some(dtype) = intensity.dtype {
            self.intensity_dtype.get_or_insert(dtype);
        }

        self.records.push(SpectrumRecord {
            x,
            y,
            z,
            mz_offset: mz.offset.ok_or_else(|| missing(index, "m/z offset"))?,
            intensity_offset: intensity
                .offset
                .ok_or_else(|| missing(index, "intensity offset"))?,
            mz_length: mz.length.ok_or_else(|| missing(index, "m/z length"))?,
            intensity_length: intensity
                .length
                .ok_or_else(|| missing(index, "intensity length"))?,
        });

        Ok(())
    }

    fn finish(self, path: &Path) -> Result<Dataset, ImzMLError> {
        if self.continuous == self.processed {
            return Err(ImzMLError::InvalidLayoutMode {
                continuous: self.continuous,
                processed: self.processed,
            });
        }
        let layout_mode = if self.continuous {
            LayoutMode::Continuous
        } else {
            LayoutMode::Processed
        };

        if self.records.is_empty() {
            return Err(ImzMLError::InvalidStructure(
                "header declares no spectra".to_string(),
            ));
        }

        let uuid = self.uuid.ok_or_else(|| {
            ImzMLError::InvalidStructure("unable to find UUID".to_string())
        })?;

        let mz_dtype = self.mz_dtype.ok_or_else(|| {
            ImzMLError::InvalidStructure("missing m/z data type".to_string())
        })?;
        let intensity_dtype = self.intensity_dtype.ok_or_else(|| {
            ImzMLError::InvalidStructure("missing intensity data type".to_string())
        })?;

        // fall back to the extent of the declared coordinates when the scan
        // settings omit the pixel counts
        let width = match self.max_x {
            Some(width) => width,
            None => 1 + self.records.iter().map(|r| r.x).max().unwrap_or(0),
        };
        let height = match self.max_y {
            Some(height) => height,
            None => 1 + self.records.iter().map(|r| r.y).max().unwrap_or(0),
        };
        if width == 0 || height == 0 {
            return Err(ImzMLError::InvalidStructure(format!(
                "pixel grid {width}x{height} has an empty axis"
            )));
        }
        for (index, r) in self.records.iter().enumerate() {
            if r.x >= width || r.y >= height || r.z >= 1 {
                return Err(ImzMLError::InvalidStructure(format!(
                    "spectrum {index}: position ({}, {}, {}) outside the \
                     {width}x{height}x1 pixel grid",
                    r.x, r.y, r.z
                )));
            }
        }

        Ok(Dataset {
            records: self.records,
            mz_dtype,
            intensity_dtype,
            pixel_grid: (1, height, width),
            layout_mode,
            uuid,
            source_imzml: path.to_path_buf(),
        })
    }
}

fn missing(index: usize, what: &str) -> ImzMLError {
    ImzMLError::InvalidStructure(format!("spectrum {index}: missing {what}"))
}

fn cv_value<T: std::str::FromStr>(cv: &CvParam) -> Option<T> {
    cv.value.as_ref()?.parse().ok()
}

/// Helper function to get an attribute value from a BytesStart
fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<String>, ImzMLError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ImzMLError::XmlError(quick_xml::Error::from(e)))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = std::str::from_utf8(&attr.value)?.to_string();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Parse a cvParam element
fn parse_cv_param(e: &BytesStart) -> Result<CvParam, ImzMLError> {
    Ok(CvParam {
        accession: get_attribute(e, "accession")?.unwrap_or_default(),
        value: get_attribute(e, "value")?,
    })
}
