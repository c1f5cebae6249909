//! Browser automation for the attendance portal.

pub mod controller;
pub mod driver;
pub mod state;
pub mod webdriver;

pub use controller::{AttendanceAutomation, AutomationController, AutomationOutcome, ControllerSettings};
pub use driver::{BrowserDriver, DriverLauncher, ElementRef, Locator};
pub use state::{Run, State, StateMachine, StepOutcome, Transition};
pub use webdriver::{WebDriverLauncher, WebDriverSession};
