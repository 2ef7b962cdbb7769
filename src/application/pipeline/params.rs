use crate::domain::signature::RequestSignature;

use super::PipelineError;

const SCENE_FILTER: &str = r"select=gt(scene\,0.5)";
const IMAGE_MUXER: &str = "image2";

struct Codec {
    encoder: &'static str,
    content_type: &'static str,
}

fn codec_for(format: &str) -> Option<Codec> {
    match format {
        "webp" => Some(Codec {
            encoder: "libwebp",
            content_type: "image/webp",
        }),
        _ => None,
    }
}

/// MIME type served for a supported output format.
pub fn content_type_for(format: &str) -> Option<&'static str> {
    codec_for(format).map(|codec| codec.content_type)
}

/// Fully-built decoder argument list for one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderInvocation {
    args: Vec<String>,
    content_type: &'static str,
}

impl DecoderInvocation {
    /// Validate the signature and build the decoder arguments.
    ///
    /// Output is a single image written to stdout. A zero length grabs the
    /// frame at the offset; a non-zero length searches that many seconds for
    /// the first scene change.
    pub fn build(signature: &RequestSignature) -> Result<Self, PipelineError> {
        let codec =
            codec_for(signature.format()).ok_or_else(|| PipelineError::UnsupportedFormat {
                format: signature.format().to_string(),
            })?;

        let mut args = vec![
            "-ss".to_string(),
            signature.offset_secs().to_string(),
            "-i".to_string(),
            signature.source().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
        ];

        let mut filters = Vec::new();
        if signature.length_secs() > 0 {
            args.push("-t".to_string());
            args.push(signature.length_secs().to_string());
            filters.push(SCENE_FILTER.to_string());
        }
        if signature.width() > 0 {
            filters.push(format!("scale={}:-1", signature.width()));
        }
        if !filters.is_empty() {
            args.push("-vf".to_string());
            args.push(filters.join(","));
        }

        args.extend(
            ["-c:v", codec.encoder, "-f", IMAGE_MUXER, "-"]
                .into_iter()
                .map(str::to_string),
        );

        Ok(Self {
            args,
            content_type: codec.content_type,
        })
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }
}
