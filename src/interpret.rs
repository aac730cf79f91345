use std::fmt::Display;
use std::path::{Path, PathBuf};

use image::GrayImage;
use log::info;
use logging_timer::time;
use serde::Serialize;

use crate::{
    ballot_card::{
        default_oval_template as default_oval_template_for, get_scanned_ballot_card_geometry,
        BallotCardGeometry, BallotSide, Orientation,
    },
    debug::{DebugSink, ImageDebugWriter, NoDebug},
    election::{BallotStyleId, Election},
    image_utils::size_image_to_fit,
    metadata::{BallotPageMetadata, MetadataError},
    ovals::{score_oval_marks_from_grid_layout, OvalScoringOptions, ScoredOvalMarks},
    timing_marks::{find_timing_mark_grid, BorderSide, TimingMarkGrid},
};

#[derive(Debug, Clone)]
pub struct InterpretOptions {
    pub election: Election,

    /// Blank oval to score against. Drawn from the card geometry if not
    /// given.
    pub oval_template: Option<GrayImage>,
    pub oval_scoring: OvalScoringOptions,

    /// Write debug images next to the input images.
    pub debug: bool,

    /// TrueType font for labels in debug images.
    pub debug_font: Option<Vec<u8>>,
}

pub type LoadedBallotPage = (GrayImage, BallotCardGeometry);
pub type LoadedBallotCard = (GrayImage, GrayImage, BallotCardGeometry);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretedBallotPage {
    pub metadata: BallotPageMetadata,
    pub orientation: Orientation,
    pub marks: ScoredOvalMarks,

    #[serde(skip)]
    pub timing_mark_grid: TimingMarkGrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterpretedBallotCard {
    pub front: InterpretedBallotPage,
    pub back: InterpretedBallotPage,
}

pub type InterpretBallotCardResult = Result<InterpretedBallotCard, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ImageOpen {
        path: PathBuf,
        message: String,
    },
    UnexpectedDimensions {
        path: PathBuf,
        dimensions: (u32, u32),
    },
    MismatchedGeometries {
        side_a: (PathBuf, BallotCardGeometry),
        side_b: (PathBuf, BallotCardGeometry),
    },
    MissingBorder {
        side: BorderSide,
    },
    /// Angles are in degrees.
    SidesNotParallel {
        left_angle: f32,
        right_angle: f32,
    },
    IncompleteBorder {
        side: BorderSide,
        expected: usize,
        actual: usize,
    },
    InvalidMetadata(MetadataError),
    InvalidCardMetadata {
        side_a: BallotPageMetadata,
        side_b: BallotPageMetadata,
    },
    MissingGridLayout {
        ballot_style_id: BallotStyleId,
    },
    /// Something that should be impossible for any input happened.
    Internal {
        message: String,
    },
}

impl Error {
    /// Whether this is a bug in the interpreter rather than a problem with
    /// the ballot images.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ImageOpen { path, message } => {
                write!(f, "could not open image {}: {}", path.display(), message)
            }
            Error::UnexpectedDimensions { path, dimensions } => write!(
                f,
                "image {} has unexpected dimensions {}x{}",
                path.display(),
                dimensions.0,
                dimensions.1
            ),
            Error::MismatchedGeometries { side_a, side_b } => write!(
                f,
                "ballot card sides have different paper sizes: {} is {:?}, {} is {:?}",
                side_a.0.display(),
                side_a.1.ballot_paper_size,
                side_b.0.display(),
                side_b.1.ballot_paper_size
            ),
            Error::MissingBorder { side } => {
                write!(f, "could not find the {} timing mark border", side)
            }
            Error::SidesNotParallel {
                left_angle,
                right_angle,
            } => write!(
                f,
                "left and right timing mark borders are not parallel: {:.2}° vs {:.2}°",
                left_angle, right_angle
            ),
            Error::IncompleteBorder {
                side,
                expected,
                actual,
            } => write!(
                f,
                "expected {} timing marks along the {} border, found {}",
                expected, side, actual
            ),
            Error::InvalidMetadata(e) => write!(f, "invalid timing mark metadata: {}", e),
            Error::InvalidCardMetadata { side_a, side_b } => write!(
                f,
                "ballot card sides are not a front and a back: {:?} and {:?}",
                side_a, side_b
            ),
            Error::MissingGridLayout { ballot_style_id } => write!(
                f,
                "election has no grid layout for ballot style {}",
                ballot_style_id
            ),
            Error::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidMetadata(e) => Some(e),
            _ => None,
        }
    }
}

/// Loads both sides of a ballot card, which must be the same paper size.
#[time]
fn load_ballot_card_images(
    side_a_path: &Path,
    side_b_path: &Path,
) -> Result<LoadedBallotCard, Error> {
    let (side_a_result, side_b_result) = rayon::join(
        || load_ballot_page_image(side_a_path),
        || load_ballot_page_image(side_b_path),
    );

    let (side_a_image, side_a_geometry) = side_a_result?;
    let (side_b_image, side_b_geometry) = side_b_result?;

    if side_a_geometry != side_b_geometry {
        return Err(Error::MismatchedGeometries {
            side_a: (side_a_path.to_path_buf(), side_a_geometry),
            side_b: (side_b_path.to_path_buf(), side_b_geometry),
        });
    }

    Ok((side_a_image, side_b_image, side_a_geometry))
}

/// Loads one side of a ballot card as grayscale, picking the geometry from
/// its aspect ratio and resizing it to that geometry's canvas.
#[time]
pub fn load_ballot_page_image(image_path: &Path) -> Result<LoadedBallotPage, Error> {
    let img = image::open(image_path)
        .map_err(|e| Error::ImageOpen {
            path: image_path.to_path_buf(),
            message: e.to_string(),
        })?
        .into_luma8();

    let geometry =
        get_scanned_ballot_card_geometry(img.dimensions()).ok_or_else(|| {
            Error::UnexpectedDimensions {
                path: image_path.to_path_buf(),
                dimensions: img.dimensions(),
            }
        })?;

    let img = size_image_to_fit(
        &img,
        geometry.canvas_size.width,
        geometry.canvas_size.height,
    );

    Ok((img, geometry))
}

fn debug_sink_for(image_path: &Path, options: &InterpretOptions) -> Box<dyn DebugSink> {
    if !options.debug {
        return Box::new(NoDebug);
    }

    let writer = ImageDebugWriter::new(image_path.to_path_buf());
    match &options.debug_font {
        Some(font) => Box::new(writer.with_font(font.clone())),
        None => Box::new(writer),
    }
}

#[time]
pub fn interpret_ballot_card(
    side_a_path: &Path,
    side_b_path: &Path,
    options: &InterpretOptions,
) -> InterpretBallotCardResult {
    let (side_a_image, side_b_image, geometry) = load_ballot_card_images(side_a_path, side_b_path)?;

    let side_a_debug = debug_sink_for(side_a_path, options);
    let side_b_debug = debug_sink_for(side_b_path, options);

    interpret_ballot_card_images(
        &side_a_image,
        &side_b_image,
        &geometry,
        options,
        side_a_debug.as_ref(),
        side_b_debug.as_ref(),
    )
}

/// Interprets both sides of a ballot card. The sides may be given in either
/// order; the decoded metadata decides which is the front.
#[time]
pub fn interpret_ballot_card_images(
    side_a_image: &GrayImage,
    side_b_image: &GrayImage,
    geometry: &BallotCardGeometry,
    options: &InterpretOptions,
    side_a_debug: &dyn DebugSink,
    side_b_debug: &dyn DebugSink,
) -> InterpretBallotCardResult {
    let (side_a_result, side_b_result) = rayon::join(
        || find_timing_mark_grid(geometry, side_a_image, side_a_debug),
        || find_timing_mark_grid(geometry, side_b_image, side_b_debug),
    );

    let side_a_grid = side_a_result?;
    let side_b_grid = side_b_result?;

    let (card_number, (front_grid, front_debug), (back_grid, back_debug)) =
        match (&side_a_grid.metadata, &side_b_grid.metadata) {
            (BallotPageMetadata::Front(front), BallotPageMetadata::Back(_)) => (
                front.card_number,
                (side_a_grid, side_a_debug),
                (side_b_grid, side_b_debug),
            ),
            (BallotPageMetadata::Back(_), BallotPageMetadata::Front(front)) => (
                front.card_number,
                (side_b_grid, side_b_debug),
                (side_a_grid, side_a_debug),
            ),
            _ => {
                return Err(Error::InvalidCardMetadata {
                    side_a: side_a_grid.metadata,
                    side_b: side_b_grid.metadata,
                })
            }
        };

    let ballot_style_id = BallotStyleId::for_card_number(card_number);
    info!("ballot card has ballot style {}", ballot_style_id);

    let grid_layout = options
        .election
        .grid_layout_for_ballot_style(&ballot_style_id)
        .ok_or_else(|| Error::MissingGridLayout {
            ballot_style_id: ballot_style_id.clone(),
        })?;

    let default_oval_template;
    let oval_template = match &options.oval_template {
        Some(oval_template) => oval_template,
        None => {
            default_oval_template = default_oval_template_for(geometry);
            &default_oval_template
        }
    };

    let (front_marks, back_marks) = rayon::join(
        || {
            score_oval_marks_from_grid_layout(
                &front_grid.image,
                oval_template,
                &front_grid.grid,
                grid_layout,
                BallotSide::Front,
                geometry.usable_area(BallotSide::Front),
                &options.oval_scoring,
                front_debug,
            )
        },
        || {
            score_oval_marks_from_grid_layout(
                &back_grid.image,
                oval_template,
                &back_grid.grid,
                grid_layout,
                BallotSide::Back,
                geometry.usable_area(BallotSide::Back),
                &options.oval_scoring,
                back_debug,
            )
        },
    );

    Ok(InterpretedBallotCard {
        front: InterpretedBallotPage {
            metadata: front_grid.metadata.clone(),
            orientation: front_grid.orientation,
            marks: front_marks,
            timing_mark_grid: front_grid,
        },
        back: InterpretedBallotPage {
            metadata: back_grid.metadata.clone(),
            orientation: back_grid.orientation,
            marks: back_marks,
            timing_mark_grid: back_grid,
        },
    })
}

#[cfg(test)]
mod test {
    use image::imageops;

    use super::*;
    use crate::{
        ballot_card::{default_oval_template, load_oval_template},
        election::{ContestId, GridPosition, OptionId},
        image_utils::WHITE,
        ovals::InterpretedOvalMark,
        test_utils::{encode_back_bits, geometry, synthetic_ballot_page, CARD_54_FRONT_BITS},
    };

    fn election(ballot_style_id: &str) -> Election {
        serde_json::from_value(serde_json::json!({
            "title": "Test Election",
            "gridLayouts": [{
                "precinctId": "town-id-00701-precinct",
                "ballotStyleId": ballot_style_id,
                "columns": 34,
                "rows": 41,
                "gridPositions": [
                    {
                        "type": "option",
                        "side": "front",
                        "column": 5,
                        "row": 8,
                        "contestId": "governor",
                        "optionId": "smith"
                    },
                    {
                        "type": "option",
                        "side": "front",
                        "column": 5,
                        "row": 10,
                        "contestId": "governor",
                        "optionId": "jones"
                    },
                    {
                        "type": "write-in",
                        "side": "back",
                        "column": 12,
                        "row": 14,
                        "contestId": "sheriff",
                        "writeInIndex": 0
                    },
                    {
                        "type": "option",
                        "side": "back",
                        "column": 20,
                        "row": 30,
                        "contestId": "sheriff",
                        "optionId": "lee"
                    }
                ]
            }]
        }))
        .unwrap()
    }

    fn options(ballot_style_id: &str) -> InterpretOptions {
        InterpretOptions {
            election: election(ballot_style_id),
            oval_template: None,
            oval_scoring: OvalScoringOptions::default(),
            debug: false,
            debug_font: None,
        }
    }

    fn front_page() -> GrayImage {
        synthetic_ballot_page(&CARD_54_FRONT_BITS, &[(5, 8)], &[(5, 10)])
    }

    fn back_page() -> GrayImage {
        synthetic_ballot_page(&encode_back_bits(8, 11, 22, 6), &[(12, 14)], &[(20, 30)])
    }

    fn save(dir: &tempfile::TempDir, name: &str, img: &GrayImage) -> PathBuf {
        let path = dir.path().join(name);
        img.save(&path).unwrap();
        path
    }

    fn score_for(marks: &ScoredOvalMarks, column: u32, row: u32) -> InterpretedOvalMark {
        marks
            .iter()
            .find_map(|(position, mark)| {
                let location = position.location();
                (location.column == column && location.row == row).then_some(*mark)
            })
            .flatten()
            .unwrap_or_else(|| panic!("no scored mark at column {}, row {}", column, row))
    }

    fn assert_expected_marks(card: &InterpretedBallotCard) {
        assert_eq!(card.front.marks.len(), 2);
        assert_eq!(card.back.marks.len(), 2);

        let smith = score_for(&card.front.marks, 5, 8);
        assert!(smith.score > 0.5, "{}", smith);
        let jones = score_for(&card.front.marks, 5, 10);
        assert!(jones.score < 0.1, "{}", jones);
        let write_in = score_for(&card.back.marks, 12, 14);
        assert!(write_in.score > 0.5, "{}", write_in);
        let lee = score_for(&card.back.marks, 20, 30);
        assert!(lee.score < 0.1, "{}", lee);

        assert!(card.front.marks.iter().all(|(position, _)| matches!(
            position,
            GridPosition::Option { side: BallotSide::Front, .. }
        )));
    }

    #[test]
    fn test_interpret_ballot_card() {
        let dir = tempfile::tempdir().unwrap();
        let front_path = save(&dir, "front.png", &front_page());
        let back_path = save(&dir, "back.png", &back_page());

        let card =
            interpret_ballot_card(&front_path, &back_path, &options("card-number-54")).unwrap();

        let BallotPageMetadata::Front(front) = &card.front.metadata else {
            panic!("expected front metadata");
        };
        assert_eq!(front.card_number, 54);
        assert!(matches!(card.back.metadata, BallotPageMetadata::Back(_)));
        assert_eq!(card.front.orientation, Orientation::Portrait);
        assert_eq!(card.back.orientation, Orientation::Portrait);
        assert_expected_marks(&card);
    }

    #[test]
    fn test_oval_template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = save(&dir, "oval.png", &default_oval_template(&geometry()));

        let mut options = options("card-number-54");
        options.oval_template = Some(load_oval_template(&template_path).unwrap());

        let card = interpret_ballot_card_images(
            &front_page(),
            &back_page(),
            &geometry(),
            &options,
            &NoDebug,
            &NoDebug,
        )
        .unwrap();
        let smith = score_for(&card.front.marks, 5, 8);
        let jones = score_for(&card.front.marks, 5, 10);
        assert!(smith.score > jones.score, "{} vs {}", smith, jones);
        assert!(jones.score < 0.1, "{}", jones);
    }

    #[test]
    fn test_positions_outside_the_usable_area_are_not_scored() {
        let mut options = options("card-number-54");
        // the front's usable area stops at row 37
        options.election.grid_layouts[0]
            .grid_positions
            .push(GridPosition::Option {
                side: BallotSide::Front,
                column: 5,
                row: 38,
                contest_id: ContestId::from("governor".to_string()),
                option_id: OptionId::from("footer".to_string()),
            });
        let front = synthetic_ballot_page(&CARD_54_FRONT_BITS, &[(5, 8), (5, 38)], &[(5, 10)]);

        let card = interpret_ballot_card_images(
            &front,
            &back_page(),
            &geometry(),
            &options,
            &NoDebug,
            &NoDebug,
        )
        .unwrap();

        assert_eq!(card.front.marks.len(), 3);
        let footer = card
            .front
            .marks
            .iter()
            .find(|(position, _)| position.location().row == 38)
            .map(|(_, mark)| *mark);
        assert_eq!(footer, Some(None));
        assert!(score_for(&card.front.marks, 5, 8).score > 0.5);
    }

    #[test]
    fn test_back_matching_the_front_checksum_is_paired() {
        let back = synthetic_ballot_page(&encode_back_bits(3, 11, 20, 6), &[(12, 14)], &[(20, 30)]);
        let card = interpret_ballot_card_images(
            &front_page(),
            &back,
            &geometry(),
            &options("card-number-54"),
            &NoDebug,
            &NoDebug,
        )
        .unwrap();

        let BallotPageMetadata::Back(metadata) = &card.back.metadata else {
            panic!("expected back metadata, got {:?}", card.back.metadata);
        };
        assert_eq!(metadata.election_day, 3);
        assert_expected_marks(&card);
    }

    #[test]
    fn test_sides_in_either_order() {
        let card = interpret_ballot_card_images(
            &back_page(),
            &front_page(),
            &geometry(),
            &options("card-number-54"),
            &NoDebug,
            &NoDebug,
        )
        .unwrap();

        assert!(matches!(card.front.metadata, BallotPageMetadata::Front(_)));
        assert!(matches!(card.back.metadata, BallotPageMetadata::Back(_)));
        assert_expected_marks(&card);
    }

    #[test]
    fn test_upside_down_front() {
        let card = interpret_ballot_card_images(
            &imageops::rotate180(&front_page()),
            &back_page(),
            &geometry(),
            &options("card-number-54"),
            &NoDebug,
            &NoDebug,
        )
        .unwrap();

        assert_eq!(card.front.orientation, Orientation::PortraitReversed);
        assert_eq!(card.back.orientation, Orientation::Portrait);
        assert_expected_marks(&card);
    }

    #[test]
    fn test_two_fronts() {
        let result = interpret_ballot_card_images(
            &front_page(),
            &front_page(),
            &geometry(),
            &options("card-number-54"),
            &NoDebug,
            &NoDebug,
        );
        assert!(
            matches!(result, Err(Error::InvalidCardMetadata { .. })),
            "{:?}",
            result.map(|_| ())
        );
    }

    #[test]
    fn test_missing_grid_layout() {
        let result = interpret_ballot_card_images(
            &front_page(),
            &back_page(),
            &geometry(),
            &options("card-number-7"),
            &NoDebug,
            &NoDebug,
        );
        assert_eq!(
            result.map(|_| ()),
            Err(Error::MissingGridLayout {
                ballot_style_id: BallotStyleId::for_card_number(54)
            })
        );
    }

    #[test]
    fn test_blank_page() {
        let blank = GrayImage::from_pixel(1696, 2200, WHITE);
        let error = interpret_ballot_card_images(
            &front_page(),
            &blank,
            &geometry(),
            &options("card-number-54"),
            &NoDebug,
            &NoDebug,
        )
        .map(|_| ())
        .unwrap_err();
        assert!(matches!(error, Error::MissingBorder { .. }), "{}", error);
        assert!(!error.is_internal());
    }

    #[test]
    fn test_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(
            load_ballot_page_image(&missing),
            Err(Error::ImageOpen { path, .. }) if path == missing
        ));

        let square = save(&dir, "square.png", &GrayImage::from_pixel(1000, 1000, WHITE));
        assert_eq!(
            load_ballot_page_image(&square).map(|_| ()),
            Err(Error::UnexpectedDimensions {
                path: square.clone(),
                dimensions: (1000, 1000)
            })
        );

        let letter = save(&dir, "letter.png", &GrayImage::from_pixel(1696, 2200, WHITE));
        let legal = save(&dir, "legal.png", &GrayImage::from_pixel(1696, 2800, WHITE));
        assert!(matches!(
            interpret_ballot_card(&letter, &legal, &options("card-number-54")),
            Err(Error::MismatchedGeometries { .. })
        ));
    }

    #[test]
    fn test_debug_images_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let front_path = save(&dir, "front.png", &front_page());
        let back_path = save(&dir, "back.png", &back_page());

        let mut options = options("card-number-54");
        options.debug = true;
        interpret_ballot_card(&front_path, &back_path, &options).unwrap();

        for stem in ["front", "back"] {
            for label in ["border_lines", "timing_mark_grid", "scored_oval_marks"] {
                let path = dir.path().join(format!("{}_debug_{}.png", stem, label));
                assert!(path.exists(), "missing {}", path.display());
            }
        }
    }

    #[test]
    fn test_serialized_card() {
        let card = interpret_ballot_card_images(
            &front_page(),
            &back_page(),
            &geometry(),
            &options("card-number-54"),
            &NoDebug,
            &NoDebug,
        )
        .unwrap();

        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["front"]["metadata"]["side"], "front");
        assert_eq!(json["front"]["metadata"]["cardNumber"], 54);
        assert_eq!(json["back"]["metadata"]["side"], "back");
        assert_eq!(json["back"]["metadata"]["electionMonth"], 11);
        assert_eq!(json["front"]["orientation"], "portrait");
        assert!(json["front"].get("timingMarkGrid").is_none());
        assert_eq!(json["front"]["marks"].as_array().unwrap().len(), 2);
    }
}
