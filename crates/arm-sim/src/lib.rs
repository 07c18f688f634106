//! Simulated picking arm
//!
//! Consumes the final pixel boxes from the fusion pipeline and walks a
//! pick-and-place cycle over them: approach, descend, close the gripper,
//! lift, carry to the bin, release. Pixel coordinates on the tray plane
//! are treated as millimeters at the fixed working distance, so no
//! camera model is involved.
//!
//! Motion takes no wall-clock time. Travel distance and duration are
//! accumulated arithmetically from the configured speed and reported,
//! which keeps simulated runs instant and deterministic.
//!
//! # Example
//! ```
//! use harvest_arm_sim::{ArmConfig, ArmSimulator};
//! use harvest_common::PixelBox;
//!
//! let mut arm = ArmSimulator::new(ArmConfig::default());
//! let boxes = vec![PixelBox { x: 300, y: 400, w: 40, h: 40 }];
//! let report = arm.pick_all(&boxes);
//! assert_eq!(report.picked, 1);
//! assert_eq!(report.skipped, 0);
//! ```

use harvest_common::PixelBox;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Seconds charged per gripper open or close
const GRIPPER_SECONDS: f64 = 0.2;

/// Reachable volume of the arm, in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceLimits {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Default for WorkspaceLimits {
    fn default() -> Self {
        // Covers a full tray image at 1 px per mm
        Self {
            x_min: 0.0,
            x_max: 1280.0,
            y_min: 0.0,
            y_max: 1280.0,
            z_min: 0.0,
            z_max: 200.0,
        }
    }
}

impl WorkspaceLimits {
    /// Whether a point lies inside the workspace (bounds inclusive)
    #[must_use]
    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        x >= self.x_min
            && x <= self.x_max
            && y >= self.y_min
            && y <= self.y_max
            && z >= self.z_min
            && z <= self.z_max
    }
}

/// Arm simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    /// Travel speed in mm per second
    pub speed: f64,
    /// Height above the tray at which caps are grasped, in mm
    pub pick_height: f64,
    /// Approach clearance above the grasp point, in mm
    pub clearance: f64,
    /// Lift height after a grasp, in mm
    pub lift_height: f64,
    /// Drop-off point for picked caps
    pub bin_position: (f64, f64, f64),
    /// Reachable volume
    pub workspace: WorkspaceLimits,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            speed: 100.0,
            pick_height: 40.0,
            clearance: 50.0,
            lift_height: 100.0,
            bin_position: (0.0, 0.0, 50.0),
            workspace: WorkspaceLimits::default(),
        }
    }
}

/// Gripper state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GripperState {
    Open,
    Closed,
}

/// Outcome of a [`ArmSimulator::pick_all`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PickReport {
    /// Boxes handed to the arm
    pub attempted: usize,
    /// Boxes successfully picked and binned
    pub picked: usize,
    /// Boxes whose target fell outside the workspace
    pub skipped: usize,
    /// Total travel distance in mm
    pub travel_mm: f64,
    /// Simulated run time in seconds
    pub duration_s: f64,
}

/// Simulated pick-and-place arm
#[derive(Debug, Clone)]
pub struct ArmSimulator {
    config: ArmConfig,
    position: (f64, f64, f64),
    gripper: GripperState,
    travel_mm: f64,
    duration_s: f64,
}

impl ArmSimulator {
    #[must_use]
    pub fn new(config: ArmConfig) -> Self {
        Self {
            config,
            position: (0.0, 0.0, 0.0),
            gripper: GripperState::Open,
            travel_mm: 0.0,
            duration_s: 0.0,
        }
    }

    #[must_use]
    pub fn position(&self) -> (f64, f64, f64) {
        self.position
    }

    #[must_use]
    pub fn gripper(&self) -> GripperState {
        self.gripper
    }

    /// Move to a target point, charging travel distance and time
    ///
    /// Targets outside the workspace are rejected with a warning and the
    /// arm stays where it is.
    pub fn move_to(&mut self, x: f64, y: f64, z: f64) -> bool {
        if !self.config.workspace.contains(x, y, z) {
            warn!(
                "Target ({:.0}, {:.0}, {:.0}) is outside the workspace, ignoring",
                x, y, z
            );
            return false;
        }

        let (cx, cy, cz) = self.position;
        let distance = ((x - cx).powi(2) + (y - cy).powi(2) + (z - cz).powi(2)).sqrt();
        self.travel_mm += distance;
        self.duration_s += distance / self.config.speed;
        self.position = (x, y, z);
        debug!("Arm moved to ({:.0}, {:.0}, {:.0})", x, y, z);
        true
    }

    /// Approach from above, descend, close the gripper, lift
    pub fn grasp(&mut self, x: f64, y: f64, z: f64) -> bool {
        if !self.move_to(x, y, z + self.config.clearance) {
            return false;
        }
        if !self.move_to(x, y, z) {
            return false;
        }
        self.close_gripper();
        self.move_to(x, y, z + self.config.lift_height)
    }

    /// Approach from above, descend, open the gripper, retract
    pub fn place(&mut self, x: f64, y: f64, z: f64) -> bool {
        if !self.move_to(x, y, z + self.config.clearance) {
            return false;
        }
        if !self.move_to(x, y, z) {
            return false;
        }
        self.open_gripper();
        self.move_to(x, y, z + self.config.clearance)
    }

    pub fn return_to_base(&mut self) -> bool {
        debug!("Arm returning to base");
        self.move_to(0.0, 0.0, 0.0)
    }

    /// Pick every box in turn and carry it to the bin
    ///
    /// Each box center becomes a planar target at the configured pick
    /// height. Out-of-workspace targets are skipped and counted; the arm
    /// returns to base when done.
    pub fn pick_all(&mut self, boxes: &[PixelBox]) -> PickReport {
        let start_travel = self.travel_mm;
        let start_duration = self.duration_s;
        let mut picked = 0;
        let mut skipped = 0;

        for pixel_box in boxes {
            let (cx, cy) = pixel_box.center();
            let z = self.config.pick_height;
            if !self.config.workspace.contains(cx, cy, z) {
                warn!(
                    "Box center ({:.0}, {:.0}) is out of reach, skipping",
                    cx, cy
                );
                skipped += 1;
                continue;
            }

            if !self.grasp(cx, cy, z) {
                skipped += 1;
                continue;
            }
            let (bx, by, bz) = self.config.bin_position;
            if self.place(bx, by, bz) {
                picked += 1;
            } else {
                skipped += 1;
            }
        }

        self.return_to_base();

        let report = PickReport {
            attempted: boxes.len(),
            picked,
            skipped,
            travel_mm: self.travel_mm - start_travel,
            duration_s: self.duration_s - start_duration,
        };
        info!(
            "Picked {}/{} boxes ({} skipped), {:.0} mm in {:.1} s",
            report.picked, report.attempted, report.skipped, report.travel_mm, report.duration_s
        );
        report
    }

    fn open_gripper(&mut self) {
        self.gripper = GripperState::Open;
        self.duration_s += GRIPPER_SECONDS;
        debug!("Gripper opened");
    }

    fn close_gripper(&mut self) {
        self.gripper = GripperState::Closed;
        self.duration_s += GRIPPER_SECONDS;
        debug!("Gripper closed");
    }
}
