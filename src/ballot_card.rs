use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold};
use imageproc::drawing::draw_hollow_ellipse_mut;
use serde::Serialize;

use crate::geometry::{rect_from_min_max, Rect};
use crate::image_utils::{bleed, BLACK, WHITE};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BallotPaperSize {
    Letter,
    Legal,
}

impl FromStr for BallotPaperSize {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "letter" => Ok(BallotPaperSize::Letter),
            "legal" => Ok(BallotPaperSize::Legal),
            _ => Err(GeometryError::UnknownPaperSize(s.to_string())),
        }
    }
}

/// Whether a geometry describes a rendered template (72 ppi) or a scanned
/// ballot card (200 ppi).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GeometryMode {
    Template,
    Scanned,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

/// Distances from each edge of the canvas within which to look for timing
/// marks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Inset {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BallotCardGeometry {
    pub ballot_paper_size: BallotPaperSize,
    pub pixels_per_inch: u32,
    pub canvas_size: Size<u32>,
    pub content_area: Rect,
    pub oval_size: Size<u32>,
    pub timing_mark_size: Size<f32>,
    pub grid_size: Size<u32>,
    /// Usable area of the front side in grid coordinates, i.e. excluding the
    /// border and the footer rows.
    pub front_usable_area: Rect,
    /// Usable area of the back side in grid coordinates.
    pub back_usable_area: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BallotSide {
    Front,
    Back,
}

/// Orientation of a scanned page relative to the printed ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    PortraitReversed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    UnknownPaperSize(String),
    Inconsistent {
        paper_size: BallotPaperSize,
        mode: GeometryMode,
        reason: String,
    },
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryError::UnknownPaperSize(name) => write!(f, "unknown paper size: {}", name),
            GeometryError::Inconsistent {
                paper_size,
                mode,
                reason,
            } => write!(
                f,
                "inconsistent {:?} {:?} geometry: {}",
                mode, paper_size, reason
            ),
        }
    }
}

impl std::error::Error for GeometryError {}

impl BallotCardGeometry {
    /// Bounds of the strips along each edge that are searched for timing
    /// marks. The side strips need to contain a whole timing mark width plus
    /// margin; the top and bottom rows sit further in from the paper edge.
    pub fn search_inset(&self) -> Inset {
        let horizontal = (self.timing_mark_size.width * 3.0).ceil() as u32;
        let vertical = (self.timing_mark_size.width * 4.0).ceil() as u32;
        Inset {
            top: vertical,
            bottom: vertical,
            left: horizontal,
            right: horizontal,
        }
    }

    pub fn usable_area(&self, side: BallotSide) -> Rect {
        match side {
            BallotSide::Front => self.front_usable_area,
            BallotSide::Back => self.back_usable_area,
        }
    }

    /// Checks that the grid, content area and timing mark size describe a
    /// card that can physically exist.
    pub fn check_consistency(&self, mode: GeometryMode) -> Result<(), GeometryError> {
        let fail = |reason: String| GeometryError::Inconsistent {
            paper_size: self.ballot_paper_size,
            mode,
            reason,
        };

        if self.grid_size.width < 3 || self.grid_size.height < 3 {
            return Err(fail(format!(
                "grid {}x{} has no interior",
                self.grid_size.width, self.grid_size.height
            )));
        }

        let canvas = rect_from_min_max(
            0,
            0,
            self.canvas_size.width as i32 - 1,
            self.canvas_size.height as i32 - 1,
        );
        if self.content_area.intersect(canvas) != Some(self.content_area) {
            return Err(fail("content area extends past the canvas".to_string()));
        }

        // Every column needs room for a timing mark plus a gap at least as
        // wide as the mark height; every row needs room for a mark height
        // plus some gap.
        let column_pitch = self.content_area.width() as f32 / self.grid_size.width as f32;
        let row_pitch = self.content_area.height() as f32 / self.grid_size.height as f32;
        if column_pitch <= self.timing_mark_size.width + self.timing_mark_size.height / 2.0 {
            return Err(fail(format!(
                "column pitch {:.1}px cannot fit {:.1}px timing marks",
                column_pitch, self.timing_mark_size.width
            )));
        }
        if row_pitch <= self.timing_mark_size.height * 2.0 {
            return Err(fail(format!(
                "row pitch {:.1}px cannot fit {:.1}px timing marks",
                row_pitch, self.timing_mark_size.height
            )));
        }

        for (side, area) in [
            (BallotSide::Front, self.front_usable_area),
            (BallotSide::Back, self.back_usable_area),
        ] {
            if area.left() < 1
                || area.top() < 1
                || area.right() > self.grid_size.width as i32 - 2
                || area.bottom() > self.grid_size.height as i32 - 2
            {
                return Err(fail(format!("{:?} usable area overlaps the border", side)));
            }
        }

        Ok(())
    }
}

pub fn get_template_ballot_card_geometry_8pt5x11() -> BallotCardGeometry {
    BallotCardGeometry {
        ballot_paper_size: BallotPaperSize::Letter,
        pixels_per_inch: 72,
        canvas_size: Size {
            width: 612,
            height: 792,
        },
        content_area: rect_from_min_max(0, 18, 611, 773),
        oval_size: Size {
            width: 15,
            height: 10,
        },
        timing_mark_size: Size {
            width: 13.5,
            height: 4.5,
        },
        grid_size: Size {
            width: 34,
            height: 41,
        },
        front_usable_area: rect_from_min_max(1, 1, 32, 37),
        back_usable_area: rect_from_min_max(1, 1, 32, 39),
    }
}

pub fn get_template_ballot_card_geometry_8pt5x14() -> BallotCardGeometry {
    BallotCardGeometry {
        ballot_paper_size: BallotPaperSize::Legal,
        pixels_per_inch: 72,
        canvas_size: Size {
            width: 612,
            height: 1008,
        },
        content_area: rect_from_min_max(0, 18, 611, 989),
        oval_size: Size {
            width: 15,
            height: 10,
        },
        timing_mark_size: Size {
            width: 13.5,
            height: 4.5,
        },
        grid_size: Size {
            width: 34,
            height: 53,
        },
        front_usable_area: rect_from_min_max(1, 1, 32, 49),
        back_usable_area: rect_from_min_max(1, 1, 32, 51),
    }
}

pub fn get_scanned_ballot_card_geometry_8pt5x11() -> BallotCardGeometry {
    BallotCardGeometry {
        ballot_paper_size: BallotPaperSize::Letter,
        pixels_per_inch: 200,
        canvas_size: Size {
            width: 1696,
            height: 2200,
        },
        content_area: rect_from_min_max(0, 50, 1695, 2149),
        oval_size: Size {
            width: 40,
            height: 26,
        },
        timing_mark_size: Size {
            width: 37.5,
            height: 12.5,
        },
        grid_size: Size {
            width: 34,
            height: 41,
        },
        front_usable_area: rect_from_min_max(1, 1, 32, 37),
        back_usable_area: rect_from_min_max(1, 1, 32, 39),
    }
}

pub fn get_scanned_ballot_card_geometry_8pt5x14() -> BallotCardGeometry {
    BallotCardGeometry {
        ballot_paper_size: BallotPaperSize::Legal,
        pixels_per_inch: 200,
        canvas_size: Size {
            width: 1696,
            height: 2800,
        },
        content_area: rect_from_min_max(0, 50, 1695, 2749),
        oval_size: Size {
            width: 40,
            height: 26,
        },
        timing_mark_size: Size {
            width: 37.5,
            height: 12.5,
        },
        grid_size: Size {
            width: 34,
            height: 53,
        },
        front_usable_area: rect_from_min_max(1, 1, 32, 49),
        back_usable_area: rect_from_min_max(1, 1, 32, 51),
    }
}

/// Selects one of the canonical geometries, verifying that it is internally
/// consistent before handing it out.
pub fn get_ballot_card_geometry(
    paper_size: BallotPaperSize,
    mode: GeometryMode,
) -> Result<BallotCardGeometry, GeometryError> {
    let geometry = match (paper_size, mode) {
        (BallotPaperSize::Letter, GeometryMode::Template) => {
            get_template_ballot_card_geometry_8pt5x11()
        }
        (BallotPaperSize::Legal, GeometryMode::Template) => {
            get_template_ballot_card_geometry_8pt5x14()
        }
        (BallotPaperSize::Letter, GeometryMode::Scanned) => {
            get_scanned_ballot_card_geometry_8pt5x11()
        }
        (BallotPaperSize::Legal, GeometryMode::Scanned) => {
            get_scanned_ballot_card_geometry_8pt5x14()
        }
    };
    geometry.check_consistency(mode)?;
    Ok(geometry)
}

/// Picks the scanned geometry whose aspect ratio matches an image of the given
/// dimensions.
pub fn get_scanned_ballot_card_geometry(size: (u32, u32)) -> Option<BallotCardGeometry> {
    let (width, height) = size;
    if height == 0 {
        return None;
    }
    let aspect_ratio = width as f32 / height as f32;

    [BallotPaperSize::Letter, BallotPaperSize::Legal]
        .into_iter()
        .filter_map(|paper_size| get_ballot_card_geometry(paper_size, GeometryMode::Scanned).ok())
        .find(|geometry| {
            let expected_aspect_ratio =
                geometry.canvas_size.width as f32 / geometry.canvas_size.height as f32;
            (aspect_ratio - expected_aspect_ratio).abs() < 0.01
        })
}

/// Draws a blank oval the size of the geometry's ovals and binarizes it, for
/// use when no scanned oval template is provided.
pub fn default_oval_template(geometry: &BallotCardGeometry) -> GrayImage {
    let Size { width, height } = geometry.oval_size;
    let mut oval = GrayImage::from_pixel(width, height, WHITE);
    draw_hollow_ellipse_mut(
        &mut oval,
        (width as i32 / 2, height as i32 / 2),
        (width as i32 - 1) / 2,
        (height as i32 - 1) / 2,
        BLACK,
    );
    bleed(&oval, &BLACK)
}

/// Loads a scanned oval template, binarizing it and thickening its outline.
pub fn load_oval_template(path: &Path) -> Option<GrayImage> {
    let oval_scan_image = image::open(path).ok()?.into_luma8();
    Some(bleed(
        &threshold(&oval_scan_image, otsu_level(&oval_scan_image)),
        &BLACK,
    ))
}
