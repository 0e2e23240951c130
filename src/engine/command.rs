use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One execution of the external engine for one purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineStage {
    Init,
    RemoveBackground,
    Derender,
}

impl EngineStage {
    #[must_use]
    pub fn mode_arg(&self) -> &'static str {
        match self {
            EngineStage::Init => "init",
            EngineStage::RemoveBackground => "removebg",
            EngineStage::Derender => "derender",
        }
    }
}

/// Input interpretation for a processing run: a single video file or a
/// directory of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Video,
    #[serde(rename = "Image Sequence")]
    ImageSequence,
}

/// Fully resolved invocation of the engine executable. Argument order is
/// part of the engine's CLI contract.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub stage: EngineStage,
    pub model_path: PathBuf,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub api_key: String,
    /// Target model version when the engine should download it first.
    pub download_model: Option<String>,
}

impl EngineCommand {
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            self.stage.mode_arg().into(),
            "-p".into(),
            self.model_path.clone().into_os_string(),
        ];
        if let Some(input) = &self.input {
            args.push("-i".into());
            args.push(input.clone().into_os_string());
        }
        if let Some(output) = &self.output {
            args.push("-o".into());
            args.push(output.clone().into_os_string());
        }
        args.push("-k".into());
        args.push(self.api_key.clone().into());
        if let Some(version) = &self.download_model {
            args.push("--download-model".into());
            args.push("--model-version".into());
            args.push(version.clone().into());
        }
        args
    }
}

#[must_use]
pub fn engine_executable(engine_dir: &Path) -> PathBuf {
    let name = if cfg!(target_os = "windows") {
        "relight-engine.exe"
    } else {
        "relight-engine"
    };
    engine_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_args_include_download_flags_when_requested() {
        let command = EngineCommand {
            stage: EngineStage::Init,
            model_path: PathBuf::from("/data/model"),
            input: None,
            output: None,
            api_key: "k123".into(),
            download_model: Some("2024-05-01".into()),
        };
        let args: Vec<String> = command
            .to_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-m",
                "init",
                "-p",
                "/data/model",
                "-k",
                "k123",
                "--download-model",
                "--model-version",
                "2024-05-01"
            ]
        );
    }

    #[test]
    fn processing_args_carry_input_and_output() {
        let command = EngineCommand {
            stage: EngineStage::Derender,
            model_path: PathBuf::from("/data/model"),
            input: Some(PathBuf::from("/work/in")),
            output: Some(PathBuf::from("/work/out")),
            api_key: "k123".into(),
            download_model: None,
        };
        let args: Vec<String> = command
            .to_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-m", "derender", "-p", "/data/model", "-i", "/work/in", "-o", "/work/out", "-k",
                "k123"
            ]
        );
    }

    #[test]
    fn run_mode_uses_frontend_wire_labels() {
        assert_eq!(
            serde_json::to_string(&RunMode::ImageSequence).unwrap(),
            "\"Image Sequence\""
        );
        assert_eq!(
            serde_json::from_str::<RunMode>("\"Video\"").unwrap(),
            RunMode::Video
        );
    }
}
