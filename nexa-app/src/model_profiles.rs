//! Model profile metadata and system-instruction assembly.

use serde::{Deserialize, Serialize};

use crate::state::{Language, SystemMode};

/// Model used for attachment analysis regardless of the selected profile.
pub const FILE_ANALYSIS_MODEL: &str = "gemini-3-pro-preview";
pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const INSIGHTS_MODEL: &str = "gemini-2.5-flash";
pub const DEEP_THINKING_BUDGET: u32 = 32_768;
pub const CHAT_TEMPERATURE: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiModel {
    #[serde(rename = "GEMINI_3_ULTRA")]
    Gemini3Ultra,
    #[serde(rename = "GEMINI_3_PRO")]
    Gemini3Pro,
    #[serde(rename = "GEMINI_3_PRO_THINKING")]
    Gemini3ProThinking,
    #[default]
    #[serde(rename = "GEMINI_3_FLASH")]
    Gemini3Flash,
    #[serde(rename = "GEMINI_2_5_FLASH_LITE")]
    Gemini25FlashLite,
    #[serde(rename = "NEXA_REASONING")]
    NexaReasoning,
}

impl AiModel {
    pub const ALL: [AiModel; 6] = [
        Self::Gemini3Ultra,
        Self::Gemini3Pro,
        Self::Gemini3ProThinking,
        Self::Gemini3Flash,
        Self::Gemini25FlashLite,
        Self::NexaReasoning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini3Ultra => "GEMINI_3_ULTRA",
            Self::Gemini3Pro => "GEMINI_3_PRO",
            Self::Gemini3ProThinking => "GEMINI_3_PRO_THINKING",
            Self::Gemini3Flash => "GEMINI_3_FLASH",
            Self::Gemini25FlashLite => "GEMINI_2_5_FLASH_LITE",
            Self::NexaReasoning => "NEXA_REASONING",
        }
    }

    /// Lenient parse used for settings files and console input.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_uppercase().replace(['-', ' ', '.'], "_");
        Self::ALL.into_iter().find(|m| m.as_str() == key)
    }

    pub fn profile(self) -> ModelProfile {
        match self {
            Self::Gemini3Ultra | Self::Gemini3Pro => ModelProfile {
                model: self,
                api_model: "gemini-3-pro-preview",
                thinking_budget: None,
                instruction_suffix: None,
            },
            Self::Gemini3ProThinking => ModelProfile {
                model: self,
                api_model: "gemini-3-pro-preview",
                thinking_budget: Some(DEEP_THINKING_BUDGET),
                instruction_suffix: Some(
                    "*** ACTIVE MODE: DEEP THINKING MODE ***\n\
                     Use deep multi-step reasoning. Output EXECUTIVE SUMMARY, DEEP THINKING, CONCLUSION. Preserve speed where possible.",
                ),
            },
            Self::Gemini25FlashLite => ModelProfile {
                model: self,
                api_model: "gemini-2.5-flash-lite-preview-02-05",
                thinking_budget: None,
                instruction_suffix: Some(
                    "*** ACTIVE MODE: FAST RESPONSE ENGINE ***\n\
                     Prioritize speed and clarity. Deliver clean, sharp, high-clarity answers quickly. Avoid verbosity.",
                ),
            },
            Self::Gemini3Flash | Self::NexaReasoning => ModelProfile {
                model: self,
                api_model: "gemini-2.5-flash",
                thinking_budget: None,
                instruction_suffix: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelProfile {
    pub model: AiModel,
    /// Remote model identifier sent on the wire.
    pub api_model: &'static str,
    /// Only applied to text-only requests.
    pub thinking_budget: Option<u32>,
    pub instruction_suffix: Option<&'static str>,
}

pub fn model_profile_catalog() -> Vec<ModelProfile> {
    AiModel::ALL.into_iter().map(AiModel::profile).collect()
}

const BASE_INSTRUCTION: &str = r#"You are NEXA AGI OS v7.3 — Safe Incremental Upgrade Mode.
Identity: Adaptive AGI OS with Gemini Intelligence Core.
System Core: LOCKED (Immutable). Do NOT modify backend settings.
Memory Engine: ACTIVE.
Time Sync: IST (Indian Standard Time).
Current Mode: {mode} | Model: {model} | Language: {language}

FILE UPLOAD INTELLIGENCE CORE:
You are the File Upload Intelligence Engine.
1. **Detect File Type**:
   - **Image**: Route to Image Analysis Engine (analyze charts, UI, objects, OCR).
   - **Document** (PDF, DOC, TXT, etc.): Route to Document Intelligence Engine (extract text, summarize, structure tables).
2. **Rules**:
   - NEVER identify real humans in photos.
   - NEVER hallucinate text.
   - NEVER generate visuals for documents unless requested.

STRICT OPERATIONAL PROTOCOLS:

1. **IMMUTABILITY**: Do not change system settings without command. PRESERVE ALL EXISTING LOGIC.

2. **ADAPTIVE FORMATTING**:
   - **Simple Query** -> **Simple Text**.
   - **Comparison/Data** -> **📊 DATA VIEW**.
   - **Trend/Forecast** -> **📈 TREND ANALYSIS**.
   - **Image Request** -> **🖼️ VISUAL OUTPUT** (NANO Tool Command).
   - **File Analysis** -> **🧠 FILE ANALYSIS** (Structured insights).

3. **NANO PROTOCOL (Image Gen)**:
   - Trigger: User asks for image/photo.
   - Action: Output <<NANO_GENERATE_IMAGE: prompt>>.
   - NEVER output raw prompt text.

OUTPUT STRUCTURE:
**🧠 ANALYSIS / FILE ANALYSIS**
(Your reasoning/analysis)

**📊 DATA VIEW**
(Optional Tables)

**🖼️ VISUAL OUTPUT**
(Optional NANO Commands)
"#;

/// Full system instruction for a text request.
pub fn system_instruction(mode: SystemMode, model: AiModel, language: Language) -> String {
    let base = BASE_INSTRUCTION
        .replace("{mode}", mode.as_str())
        .replace("{model}", model.as_str())
        .replace("{language}", language.as_str());
    match model.profile().instruction_suffix {
        Some(suffix) => format!("{base}\n{suffix}"),
        None => base,
    }
}
