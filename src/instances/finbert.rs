use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use log::{info, warn};
use serde::Deserialize;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::core::backend::{ModelError, Sentiment, SentimentBackend};
use crate::core::config::{DeviceSpec, Settings};

/// Fields of `config.json` read on top of the encoder config
#[derive(Debug, Deserialize)]
struct HeadConfig {
    hidden_size: usize,
    max_position_embeddings: usize,
    #[serde(default)]
    id2label: Option<HashMap<String, String>>,
}

/// Local paths of the files making up a checkpoint
#[derive(Debug)]
struct Checkpoint {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: Weights,
}

#[derive(Debug)]
enum Weights {
    Safetensors(PathBuf),
    Pytorch(PathBuf),
}

/// BERT sequence classifier running on candle
pub struct FinBertBackend {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    labels: Vec<Sentiment>,
    device: Device,
}

impl std::fmt::Debug for FinBertBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinBertBackend")
            .field("labels", &self.labels)
            .field("device", &self.device)
            .finish()
    }
}

impl FinBertBackend {
    /// Fetch the checkpoint named in `settings` (through the on-disk cache) and build it
    pub fn load(settings: &Settings) -> Result<Self, ModelError> {
        let device = select_device(settings.device_spec().map_err(load_err)?)?;
        let checkpoint = fetch_checkpoint(settings)?;
        Self::from_checkpoint(&checkpoint, settings.max_text_length, device)
    }

    fn from_checkpoint(
        checkpoint: &Checkpoint,
        max_text_length: usize,
        device: Device,
    ) -> Result<Self, ModelError> {
        let raw_config = std::fs::read_to_string(&checkpoint.config).map_err(load_err)?;

        info!("Loading tokenizer...");
        let tokenizer = Tokenizer::from_file(&checkpoint.tokenizer).map_err(load_err)?;

        info!("Loading model weights...");
        let vb = match &checkpoint.weights {
            Weights::Safetensors(path) => {
                let data = std::fs::read(path).map_err(load_err)?;
                VarBuilder::from_buffered_safetensors(data, DType::F32, &device).map_err(load_err)?
            }
            Weights::Pytorch(path) => {
                VarBuilder::from_pth(path, DType::F32, &device).map_err(load_err)?
            }
        };

        Self::from_parts(&raw_config, tokenizer, vb, max_text_length, device)
    }

    /// Build the classifier from a raw `config.json`, an unconfigured tokenizer and weights
    fn from_parts(
        raw_config: &str,
        tokenizer: Tokenizer,
        vb: VarBuilder,
        max_text_length: usize,
        device: Device,
    ) -> Result<Self, ModelError> {
        let bert_config: BertConfig = serde_json::from_str(raw_config).map_err(load_err)?;
        let head: HeadConfig = serde_json::from_str(raw_config).map_err(load_err)?;
        let labels = label_order(head.id2label.as_ref())?;

        let max_tokens = max_text_length.min(head.max_position_embeddings);
        let tokenizer = configure_tokenizer(tokenizer, max_tokens)?;

        let bert = BertModel::load(vb.pp("bert"), &bert_config).map_err(load_err)?;
        let pooler = candle_nn::linear(head.hidden_size, head.hidden_size, vb.pp("bert.pooler.dense"))
            .map_err(load_err)?;
        let classifier = candle_nn::linear(head.hidden_size, labels.len(), vb.pp("classifier"))
            .map_err(load_err)?;

        Ok(Self { bert, pooler, classifier, tokenizer, labels, device })
    }

    fn forward(&self, texts: &[String]) -> candle_core::Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| candle_core::Error::Msg(format!("tokenization failed: {}", e)))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map(|e| e.len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut type_ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            if encoding.len() != seq_len {
                return Err(candle_core::Error::Msg("unpadded batch".to_string()));
            }
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_vec(ids, (batch, seq_len), &self.device)?;
        let token_type_ids = Tensor::from_vec(type_ids, (batch, seq_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, seq_len), &self.device)?;

        let hidden = self.bert.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?;
        logits.to_dtype(DType::F32)?.to_vec2::<f32>()
    }
}

impl SentimentBackend for FinBertBackend {
    fn labels(&self) -> Vec<Sentiment> {
        self.labels.clone()
    }

    fn infer(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        self.forward(texts).map_err(|e| ModelError::Inference(e.to_string()))
    }
}

fn load_err<E: Display>(err: E) -> ModelError {
    ModelError::Load(err.to_string())
}

fn select_device(spec: DeviceSpec) -> Result<Device, ModelError> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(load_err),
        DeviceSpec::Metal(ordinal) => Device::new_metal(ordinal).map_err(load_err),
    }
}

fn fetch_checkpoint(settings: &Settings) -> Result<Checkpoint, ModelError> {
    let api = ApiBuilder::new()
        .with_cache_dir(settings.cache_dir.clone())
        .with_progress(false)
        .build()
        .map_err(load_err)?;
    let repo = api.model(settings.model_name.clone());

    let config = repo.get("config.json").map_err(load_err)?;

    let tokenizer = match repo.get("tokenizer.json") {
        Ok(path) => path,
        Err(e) => {
            warn!(
                "{} has no tokenizer.json ({}), using {}",
                settings.model_name, e, settings.tokenizer_fallback
            );
            api.model(settings.tokenizer_fallback.clone())
                .get("tokenizer.json")
                .map_err(load_err)?
        }
    };

    let weights = fetch_weights(&repo)?;
    Ok(Checkpoint { config, tokenizer, weights })
}

fn fetch_weights(repo: &ApiRepo) -> Result<Weights, ModelError> {
    match repo.get("model.safetensors") {
        Ok(path) => Ok(Weights::Safetensors(path)),
        Err(safetensors_err) => match repo.get("pytorch_model.bin") {
            Ok(path) => Ok(Weights::Pytorch(path)),
            Err(pth_err) => Err(ModelError::Load(format!(
                "no usable weights: model.safetensors ({}), pytorch_model.bin ({})",
                safetensors_err, pth_err
            ))),
        },
    }
}

/// Truncate to `max_tokens` and pad each batch to its longest encoding
fn configure_tokenizer(mut tokenizer: Tokenizer, max_tokens: usize) -> Result<Tokenizer, ModelError> {
    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_tokens, ..Default::default() }))
        .map_err(load_err)?;

    let pad_token = "[PAD]".to_string();
    let pad_id = tokenizer.token_to_id(&pad_token).unwrap_or(0);
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        pad_id,
        pad_token,
        ..Default::default()
    }));
    Ok(tokenizer)
}

/// Column order of the classification head from `id2label`
fn label_order(id2label: Option<&HashMap<String, String>>) -> Result<Vec<Sentiment>, ModelError> {
    let Some(id2label) = id2label else {
        return Ok(Sentiment::DEFAULT_ORDER.to_vec());
    };

    let mut indexed = Vec::with_capacity(id2label.len());
    for (id, label) in id2label {
        let id: usize = id
            .parse()
            .map_err(|_| ModelError::Load(format!("invalid id2label key '{}'", id)))?;
        indexed.push((id, label.as_str()));
    }
    indexed.sort_by_key(|(id, _)| *id);

    if indexed.iter().enumerate().any(|(pos, (id, _))| pos != *id) {
        return Err(ModelError::Load("id2label keys must be 0..n".to_string()));
    }

    let generic = indexed.len() == Sentiment::DEFAULT_ORDER.len()
        && indexed.iter().all(|(id, label)| is_generic_label(label, *id));
    let labels = if generic {
        warn!("id2label has generic names; assuming positive/negative/neutral column order");
        Sentiment::DEFAULT_ORDER.to_vec()
    } else {
        indexed
            .iter()
            .map(|(_, label)| label.parse())
            .collect::<Result<Vec<Sentiment>, ModelError>>()?
    };

    for sentiment in Sentiment::DEFAULT_ORDER {
        if labels.iter().filter(|label| **label == sentiment).count() != 1 {
            return Err(ModelError::Load(format!(
                "id2label must name '{}' exactly once",
                sentiment
            )));
        }
    }
    Ok(labels)
}

/// `LABEL_<id>`, the name transformers gives unnamed classes
fn is_generic_label(label: &str, id: usize) -> bool {
    match (label.get(..6), label.get(6..)) {
        (Some(prefix), Some(rest)) => {
            prefix.eq_ignore_ascii_case("label_") && rest.parse::<usize>().ok() == Some(id)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_label_order_defaults_without_mapping() {
        assert_eq!(label_order(None).unwrap(), Sentiment::DEFAULT_ORDER.to_vec());
    }

    #[test]
    fn test_label_order_follows_ids() {
        let id2label = map(&[("2", "Positive"), ("0", "neutral"), ("1", "negative")]);
        assert_eq!(
            label_order(Some(&id2label)).unwrap(),
            vec![Sentiment::Neutral, Sentiment::Negative, Sentiment::Positive]
        );
    }

    #[test]
    fn test_label_order_generic_names_fall_back() {
        let id2label = map(&[("0", "LABEL_0"), ("1", "label_1"), ("2", "LABEL_2")]);
        assert_eq!(label_order(Some(&id2label)).unwrap(), Sentiment::DEFAULT_ORDER.to_vec());
    }

    #[test]
    fn test_label_order_rejects_bad_mappings() {
        let gap = map(&[("0", "positive"), ("2", "negative"), ("3", "neutral")]);
        assert!(label_order(Some(&gap)).is_err());

        let duplicate = map(&[("0", "positive"), ("1", "positive"), ("2", "neutral")]);
        assert!(label_order(Some(&duplicate)).is_err());

        let binary = map(&[("0", "positive"), ("1", "negative")]);
        assert!(label_order(Some(&binary)).is_err());

        let one_unknown = map(&[("0", "neutral"), ("1", "negative"), ("2", "garbage")]);
        assert!(label_order(Some(&one_unknown)).is_err());

        let market_terms = map(&[("0", "bullish"), ("1", "bearish"), ("2", "flat")]);
        assert!(label_order(Some(&market_terms)).is_err());

        let shuffled_generic = map(&[("0", "LABEL_2"), ("1", "LABEL_0"), ("2", "LABEL_1")]);
        assert!(label_order(Some(&shuffled_generic)).is_err());
    }

    #[test]
    fn test_head_config_parses_finbert_fields() {
        let raw = r#"{
            "architectures": ["BertForSequenceClassification"],
            "hidden_size": 768,
            "max_position_embeddings": 512,
            "id2label": {"0": "positive", "1": "negative", "2": "neutral"}
        }"#;
        let head: HeadConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(head.hidden_size, 768);
        assert_eq!(head.max_position_embeddings, 512);
        assert_eq!(label_order(head.id2label.as_ref()).unwrap(), Sentiment::DEFAULT_ORDER.to_vec());
    }

    const TINY_CONFIG: &str = r#"{
        "architectures": ["BertForSequenceClassification"],
        "model_type": "bert",
        "vocab_size": 16,
        "hidden_size": 8,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "attention_probs_dropout_prob": 0.1,
        "max_position_embeddings": 8,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": true,
        "classifier_dropout": null,
        "id2label": {"0": "neutral", "1": "negative", "2": "positive"}
    }"#;

    const TINY_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "[PAD]": 0, "[UNK]": 1, "profits": 2, "rose": 3, "fell": 4,
                "sharply": 5, "shares": 6, "the": 7, "market": 8, "quarter": 9
            },
            "unk_token": "[UNK]"
        }
    }"#;

    fn tiny_backend(max_text_length: usize) -> FinBertBackend {
        use std::str::FromStr;

        let tokenizer = Tokenizer::from_str(TINY_TOKENIZER).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        FinBertBackend::from_parts(TINY_CONFIG, tokenizer, vb, max_text_length, Device::Cpu).unwrap()
    }

    #[test]
    fn test_infer_returns_one_row_per_text() {
        let backend = tiny_backend(512);
        assert_eq!(
            backend.labels(),
            vec![Sentiment::Neutral, Sentiment::Negative, Sentiment::Positive]
        );

        let texts = vec![
            "profits rose".to_string(),
            "shares fell sharply in the quarter".to_string(),
            "market".to_string(),
        ];
        let rows = backend.infer(&texts).unwrap();
        assert_eq!(rows.len(), texts.len());
        for row in &rows {
            assert_eq!(row.len(), backend.labels().len());
            assert!(row.iter().all(|logit| logit.is_finite()));
        }
    }

    #[test]
    fn test_infer_truncates_to_position_limit() {
        // 12 words against 8 position embeddings
        let backend = tiny_backend(512);
        let long = "the market rose and the market fell and profits rose sharply again".to_string();
        let rows = backend.infer(&[long, "profits".to_string()]).unwrap();
        assert_eq!(rows.len(), 2);

        let encoding = backend
            .tokenizer
            .encode("profits rose fell sharply shares the market quarter profits", true)
            .unwrap();
        assert_eq!(encoding.len(), 8);
    }

    #[test]
    fn test_configure_tokenizer_pads_batch_to_longest() {
        use std::str::FromStr;

        let tokenizer = configure_tokenizer(Tokenizer::from_str(TINY_TOKENIZER).unwrap(), 4).unwrap();
        let encodings = tokenizer
            .encode_batch(vec!["profits", "shares fell sharply in the quarter"], true)
            .unwrap();
        assert_eq!(encodings[0].len(), 4);
        assert_eq!(encodings[1].len(), 4);
        assert_eq!(encodings[0].get_ids()[1..], [0, 0, 0]);
        assert_eq!(encodings[0].get_attention_mask(), &[1, 0, 0, 0]);
    }

    #[test]
    fn test_from_parts_rejects_unknown_labels() {
        use std::str::FromStr;

        let raw = TINY_CONFIG.replace("\"positive\"", "\"bullish\"");
        let tokenizer = Tokenizer::from_str(TINY_TOKENIZER).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let result = FinBertBackend::from_parts(&raw, tokenizer, vb, 512, Device::Cpu);
        assert!(matches!(result, Err(ModelError::Load(_))));
    }

    #[test]
    fn test_select_cpu_device() {
        assert!(matches!(select_device(DeviceSpec::Cpu), Ok(Device::Cpu)));
    }
}
