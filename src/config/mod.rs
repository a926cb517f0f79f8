pub mod actions;
pub mod settings;

pub use actions::{
    Action, ActionEntry, ActionList, Anomaly, ClickAction, DoneAction, EvalAction, ExtractAction,
    FillAction, GotoAction, ScreenshotAction, WaitForSelectorAction,
};
pub use settings::{BrowserConfig, ModelConfig, OutputConfig, RunConfig, Settings, Viewport};
