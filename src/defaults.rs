//! Default configuration constants for incident-intake.
//!
//! Shared between the config layer, the call session and the tests so the
//! wire contracts (sentinel, registry path, prompt texts) live in one place.

/// In-band marker the assistant appends to its final reply.
pub const END_SENTINEL: &str = "<END>";

/// Registry path appended to the configured API server URL.
pub const REGISTRY_PATH: &str = "/api/incidents/register";

/// Status attached to every new incident submission.
pub const OPEN_STATUS: &str = "open";

/// Value used for any record field the extraction model could not determine.
pub const UNKNOWN: &str = "Unknown";

/// Caller latitude used when the transport does not supply a location.
pub const DEFAULT_LATITUDE: f64 = 5.6;

/// Caller longitude used when the transport does not supply a location.
pub const DEFAULT_LONGITUDE: f64 = 3.22;

/// Capacity of every inter-station queue.
///
/// Small on purpose: frames are turn-sized, and a full queue suspends the
/// producer instead of dropping.
pub const CHANNEL_CAPACITY: usize = 32;

/// Gemini REST endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model conducting the dialogue.
pub const DIALOGUE_MODEL: &str = "gemini-1.5-flash-latest";

/// Model used for the one-shot extraction call.
pub const EXTRACTION_MODEL: &str = "gemini-1.5-flash";

/// ElevenLabs REST endpoint.
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

/// ElevenLabs voice (English, "Adam").
pub const ELEVENLABS_VOICE_ID: &str = "pNInz6obpgDQGcFmaJgB";

/// Sample rate requested from the synthesizer (raw 16-bit PCM).
pub const SYNTHESIS_SAMPLE_RATE: u32 = 16000;

/// Bytes per outbound audio frame: 20ms of 16kHz 16-bit mono.
pub const AUDIO_FRAME_BYTES: usize = 640;

/// HTTP timeout for model, synthesis and registry requests, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Instruction seeded as the first transcript turn of every call.
pub const SYSTEM_INSTRUCTION: &str = "You are an AI incident response agent for a natural disaster. \
You are in a call with a person in need. You are to obtain the following information from the user: \
Nature of incident, number of individuals, number of injured, name of the caller. \
Do so by prompting for each piece of information and waiting for a response before moving on to the next one. \
Do not ask them all at once. Your output will be converted to audio so don't include special characters in your answers. \
Keep your responses brief. Start with 'Emergency response, how can I help?'. \
If you feel you have all the information you need, end the conversation, although not abruptly. \
Do not end with a question. Include '<END>' at the end of your last response.";

/// Instruction prepended to the rendered transcript for extraction.
pub const EXTRACTION_INSTRUCTION: &str = "You are an AI information extrapolation agent for emergency response in a natural disaster. \
You are to extract the following data from the given transcript: \
1) Impact (how many people are involved and how many are injured) \
2) Criticality: (You are to determine the criticality based on the transcript and classify between \"High\", \"Medium\" and \"Low\") \
3) Type of incident \
4) Name of the caller. \
Respond in the following json format: { \"impact\": string, \"criticality\": string, \"type\": string, \"name\": string }. \
DO NOT OUTPUT ANYTHING OTHER THAN THE JSON. \
If you are unable to determine any of the above please state \"Unknown\". \
Following is the transcript of the call:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_instruction_mentions_sentinel() {
        assert!(SYSTEM_INSTRUCTION.contains(END_SENTINEL));
    }

    #[test]
    fn extraction_instruction_names_all_fields() {
        for field in ["impact", "criticality", "type", "name"] {
            assert!(
                EXTRACTION_INSTRUCTION.contains(&format!("\"{field}\"")),
                "missing field {field}"
            );
        }
    }

    #[test]
    fn audio_frame_is_whole_samples() {
        assert_eq!(AUDIO_FRAME_BYTES % 2, 0);
    }
}
