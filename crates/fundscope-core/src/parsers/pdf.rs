//! Positioned text extraction for PDF disclosures.
//!
//! Page content streams are walked operator by operator. Every shown string
//! is placed through the text and graphics matrices; fragments sharing a
//! baseline form a row, and a horizontal gap wider than one em splits the row
//! into cells. Table layouts that position each cell with `Td` or `Tm` keep
//! their columns this way even though no spaces are ever drawn.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use regex::Regex;

static CELL_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}|\t+|\s*\|\s*").expect("cell pattern is valid"));

/// Horizontal gap, in ems, that starts a new cell.
const CELL_GAP_EM: f32 = 1.0;
/// Gap, in ems, rendered as a word space inside a cell.
const WORD_GAP_EM: f32 = 0.1;
/// Baseline tolerance, in ems, for fragments on the same row.
const BASELINE_EM: f32 = 0.4;
/// Glyph width assumed when the font publishes no `Widths`.
const DEFAULT_GLYPH_EM: f32 = 0.5;
/// `TJ` adjustments (thousandths of an em) that read as a space.
const TJ_SPACE: f32 = -200.0;

/// One page, numbered from 1: its rows of cells, and the rows as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPage {
    pub number: u32,
    pub text: String,
    pub rows: Vec<Vec<String>>,
}

impl PdfPage {
    /// Page from laid-out text; cells are separated by two or more spaces,
    /// tabs or pipes.
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        let rows = text.lines().map(split_cells).filter(|cells| !cells.is_empty()).collect();
        Self { number, text, rows }
    }

    pub fn from_rows(number: u32, rows: Vec<Vec<String>>) -> Self {
        let text = rows.iter().map(|cells| cells.join("  ")).collect::<Vec<_>>().join("\n");
        Self { number, text, rows }
    }
}

pub fn split_cells(line: &str) -> Vec<String> {
    CELL_SPLIT
        .split(line.trim())
        .map(|cell| cell.trim().to_owned())
        .filter(|cell| !cell.is_empty())
        .collect()
}

/// Splits a PDF into pages. Implementations must not panic on corrupt input.
pub trait PdfTextExtractor: Send + Sync {
    fn pages(&self, document: &[u8]) -> Result<Vec<PdfPage>, String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfTextExtractor;

impl PdfTextExtractor for LopdfTextExtractor {
    fn pages(&self, document: &[u8]) -> Result<Vec<PdfPage>, String> {
        let pdf = Document::load_mem(document).map_err(|err| format!("pdf load failed: {err}"))?;

        let mut pages = Vec::new();
        for (number, page_id) in pdf.get_pages() {
            // Pages whose content cannot be decoded are skipped, not fatal.
            let Ok(fragments) = page_fragments(&pdf, page_id) else {
                continue;
            };
            let rows = layout_rows(fragments);
            if !rows.is_empty() {
                pages.push(PdfPage::from_rows(number, rows));
            }
        }

        if pages.is_empty() {
            return Err(String::from("pdf has no extractable text"));
        }
        Ok(pages)
    }
}

/// Affine matrix `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Self = Self([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translation(tx: f32, ty: f32) -> Self {
        Self([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`: apply `self` first, then `other`.
    fn then(self, other: Self) -> Self {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = other.0;
        Self([
            a * oa + b * oc,
            a * ob + b * od,
            c * oa + d * oc,
            c * ob + d * od,
            e * oa + f * oc + oe,
            e * ob + f * od + of,
        ])
    }

    fn horizontal_scale(self) -> f32 {
        self.0[0].hypot(self.0[1])
    }

    fn vertical_scale(self) -> f32 {
        self.0[2].hypot(self.0[3])
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Fragment {
    x: f32,
    y: f32,
    width: f32,
    size: f32,
    text: String,
}

struct FontInfo<'a> {
    encoding: Option<Encoding<'a>>,
    first_char: i64,
    widths: Vec<f32>,
}

impl<'a> FontInfo<'a> {
    fn load(pdf: &'a Document, font: &'a Dictionary) -> Self {
        let widths = font
            .get(b"Widths")
            .ok()
            .and_then(|object| pdf.dereference(object).ok())
            .and_then(|(_, object)| object.as_array().ok())
            .map(|array| {
                array.iter().map(|width| width.as_float().unwrap_or(0.0) / 1000.0).collect()
            })
            .unwrap_or_default();

        Self {
            encoding: font.get_font_encoding(pdf).ok(),
            first_char: font.get(b"FirstChar").and_then(Object::as_i64).unwrap_or(0),
            widths,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match &self.encoding {
            Some(encoding) => Document::decode_text(encoding, bytes)
                .unwrap_or_else(|_| bytes.iter().map(|b| char::from(*b)).collect()),
            None => bytes.iter().map(|b| char::from(*b)).collect(),
        }
    }

    /// Advance of `bytes` in text space units of one em.
    fn advance(&self, bytes: &[u8], decoded: &str) -> f32 {
        let single_byte = !matches!(self.encoding, Some(Encoding::UnicodeMapEncoding(_)));
        if single_byte && !self.widths.is_empty() {
            return bytes
                .iter()
                .map(|byte| {
                    usize::try_from(i64::from(*byte) - self.first_char)
                        .ok()
                        .and_then(|index| self.widths.get(index).copied())
                        .unwrap_or(DEFAULT_GLYPH_EM)
                })
                .sum();
        }
        decoded.chars().count() as f32 * DEFAULT_GLYPH_EM
    }
}

/// Text state while walking one content stream.
struct TextWalker<'f, 'a> {
    fonts: &'f BTreeMap<Vec<u8>, FontInfo<'a>>,
    font: Option<&'f FontInfo<'a>>,
    font_size: f32,
    leading: f32,
    ctm: Matrix,
    saved: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    fragments: Vec<Fragment>,
}

impl<'f, 'a> TextWalker<'f, 'a> {
    fn new(fonts: &'f BTreeMap<Vec<u8>, FontInfo<'a>>) -> Self {
        Self {
            fonts,
            font: None,
            font_size: 0.0,
            leading: 0.0,
            ctm: Matrix::IDENTITY,
            saved: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            fragments: Vec::new(),
        }
    }

    fn apply(&mut self, operation: &Operation) {
        let number = |index: usize| {
            operation
                .operands
                .get(index)
                .and_then(|operand| operand.as_float().ok())
                .unwrap_or(0.0)
        };
        let matrix = || {
            Matrix([number(0), number(1), number(2), number(3), number(4), number(5)])
        };

        match operation.operator.as_str() {
            "q" => self.saved.push(self.ctm),
            "Q" => self.ctm = self.saved.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => self.ctm = matrix().then(self.ctm),
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                let fonts = self.fonts;
                self.font = operation
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| fonts.get(name));
                self.font_size = number(1);
            }
            "TL" => self.leading = number(0),
            "Td" => self.move_line(number(0), number(1)),
            "TD" => {
                self.leading = -number(1);
                self.move_line(number(0), number(1));
            }
            "Tm" => {
                self.tlm = matrix();
                self.tm = self.tlm;
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => self.show(operation.operands.get(..1).unwrap_or_default()),
            "'" => {
                self.move_line(0.0, -self.leading);
                self.show(operation.operands.get(..1).unwrap_or_default());
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                self.show(operation.operands.get(2..).unwrap_or_default());
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operation.operands.first() {
                    self.show(items);
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translation(tx, ty).then(self.tlm);
        self.tm = self.tlm;
    }

    /// Shows strings and `TJ` adjustments as one fragment at the current
    /// position, then advances the text matrix past it.
    fn show(&mut self, items: &[Object]) {
        let mut text = String::new();
        let mut advance_em = 0.0_f32;
        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let decoded = self.font.map_or_else(
                        || bytes.iter().map(|b| char::from(*b)).collect(),
                        |font| font.decode(bytes),
                    );
                    advance_em += self.font.map_or(
                        decoded.chars().count() as f32 * DEFAULT_GLYPH_EM,
                        |font| font.advance(bytes, &decoded),
                    );
                    text.push_str(&decoded);
                }
                Object::Integer(_) | Object::Real(_) => {
                    let adjustment = item.as_float().unwrap_or(0.0);
                    if adjustment < TJ_SPACE && !text.ends_with(' ') {
                        text.push(' ');
                    }
                    advance_em -= adjustment / 1000.0;
                }
                _ => {}
            }
        }

        let placed = self.tm.then(self.ctm);
        let size = (self.font_size * placed.vertical_scale()).abs();
        let advance = advance_em * self.font_size;
        if !text.trim().is_empty() {
            self.fragments.push(Fragment {
                x: placed.0[4],
                y: placed.0[5],
                width: advance * placed.horizontal_scale(),
                size,
                text,
            });
        }
        self.tm = Matrix::translation(advance, 0.0).then(self.tm);
    }
}

fn page_fragments(pdf: &Document, page_id: ObjectId) -> Result<Vec<Fragment>, lopdf::Error> {
    let fonts: BTreeMap<Vec<u8>, FontInfo<'_>> = pdf
        .get_page_fonts(page_id)?
        .into_iter()
        .map(|(name, font)| (name, FontInfo::load(pdf, font)))
        .collect();
    let content = Content::decode(&pdf.get_page_content(page_id)?)?;

    let mut walker = TextWalker::new(&fonts);
    for operation in &content.operations {
        walker.apply(operation);
    }
    Ok(walker.fragments)
}

/// Top-to-bottom rows of left-to-right cells.
fn layout_rows(mut fragments: Vec<Fragment>) -> Vec<Vec<String>> {
    fragments.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut lines: Vec<Vec<Fragment>> = Vec::new();
    for fragment in fragments {
        match lines.last_mut() {
            Some(line) if same_baseline(&line[0], &fragment) => line.push(fragment),
            _ => lines.push(vec![fragment]),
        }
    }

    lines
        .into_iter()
        .map(line_cells)
        .filter(|cells| !cells.is_empty())
        .collect()
}

fn same_baseline(anchor: &Fragment, fragment: &Fragment) -> bool {
    let em = anchor.size.max(fragment.size).max(1.0);
    (anchor.y - fragment.y).abs() <= em * BASELINE_EM
}

fn line_cells(mut line: Vec<Fragment>) -> Vec<String> {
    line.sort_by(|a, b| a.x.total_cmp(&b.x));

    let mut cells: Vec<String> = Vec::new();
    let mut previous_end: Option<(f32, f32)> = None;
    for fragment in line {
        let text = fragment.text.trim();
        match previous_end {
            Some((end, size)) => {
                let em = size.max(fragment.size).max(1.0);
                let gap = fragment.x - end;
                let current = cells.last_mut().filter(|_| gap <= em * CELL_GAP_EM);
                match current {
                    Some(cell) => {
                        if gap > em * WORD_GAP_EM && !cell.ends_with(' ') {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    }
                    None => cells.push(text.to_owned()),
                }
            }
            None => cells.push(text.to_owned()),
        }
        previous_end = Some((fragment.x + fragment.width, fragment.size));
    }

    // Text drawn with embedded column spacing still splits on space runs.
    cells.iter().flat_map(|cell| split_cells(cell)).collect()
}

/// Single-page PDFs whose text is placed cell by cell with `Td`, so table
/// extraction can be exercised without binary fixtures.
pub mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Each line is a list of `(x, text)` cells at one baseline, top down.
    pub fn positioned_pdf(lines: &[(f32, Vec<(f32, &str)>)]) -> lopdf::Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 9.into()]),
        ];
        let mut cursor = (0.0_f32, 0.0_f32);
        for (y, cells) in lines {
            for (x, text) in cells {
                // Relative moves, the way report generators lay out cells.
                let (dx, dy) = (x - cursor.0, y - cursor.1);
                operations.push(Operation::new("Td", vec![dx.into(), dy.into()]));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::string_literal(text.as_bytes().to_vec())],
                ));
                cursor = (*x, *y);
            }
        }
        operations.push(Operation::new("ET", vec![]));

        let encoded = Content { operations }.encode()?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::positioned_pdf;
    use super::*;

    #[test]
    fn corrupt_documents_are_errors() {
        assert!(LopdfTextExtractor.pages(b"not a pdf").is_err());
        assert!(LopdfTextExtractor.pages(b"").is_err());
    }

    #[test]
    fn positioned_cells_become_rows_and_columns() {
        let pdf = positioned_pdf(&[
            (800.0, vec![(50.0, "Portfolio")]),
            (780.0, vec![(50.0, "ISIN"), (150.0, "Name"), (300.0, "Market value"), (420.0, "%")]),
            (
                765.0,
                vec![
                    (50.0, "FR0000120271"),
                    (150.0, "TotalEnergies"),
                    (300.0, "600"),
                    (420.0, "60"),
                ],
            ),
            (
                750.0,
                vec![(50.0, "FR0000131104"), (150.0, "BNP Paribas"), (300.0, "400"), (420.0, "40")],
            ),
        ])
        .expect("pdf");

        let pages = LopdfTextExtractor.pages(&pdf).expect("extract");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].rows[0], vec!["Portfolio"]);
        assert_eq!(pages[0].rows[1], vec!["ISIN", "Name", "Market value", "%"]);
        assert_eq!(pages[0].rows[3], vec!["FR0000131104", "BNP Paribas", "400", "40"]);
        assert!(pages[0].text.contains("FR0000120271  TotalEnergies"));
    }

    #[test]
    fn words_close_together_stay_in_one_cell() {
        let line = (700.0, vec![(50.0, "BNP"), (70.0, "Paribas"), (200.0, "12,5")]);
        let pdf = positioned_pdf(&[line]).expect("pdf");

        let pages = LopdfTextExtractor.pages(&pdf).expect("extract");

        assert_eq!(pages[0].rows, vec![vec![String::from("BNP Paribas"), String::from("12,5")]]);
    }

    #[test]
    fn slightly_offset_baselines_share_a_row() {
        let pdf = positioned_pdf(&[
            (700.0, vec![(50.0, "Nestle SA")]),
            (699.0, vec![(200.0, "1 000")]),
        ])
        .expect("pdf");

        let pages = LopdfTextExtractor.pages(&pdf).expect("extract");

        assert_eq!(pages[0].rows.len(), 1);
        assert_eq!(pages[0].rows[0], vec!["Nestle SA", "1 000"]);
    }

    #[test]
    fn matrices_compose_translation_after_scale() {
        let scaled = Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        let moved = Matrix::translation(10.0, 5.0).then(scaled);
        assert_eq!(moved.0[4], 20.0);
        assert_eq!(moved.0[5], 10.0);
        assert_eq!(moved.vertical_scale(), 2.0);
    }

    #[test]
    fn laid_out_text_splits_on_space_runs() {
        let page = PdfPage::new(1, "ISIN   Name | Value\n\nFR0000133308  Orange SA  10\n");
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0], vec!["ISIN", "Name", "Value"]);
    }
}
