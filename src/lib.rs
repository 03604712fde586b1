use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub topic: String,
    pub confidence: f64,
    pub description: String,
    pub glyph: String,
    pub all_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineMatch {
    pub line_id: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodKind {
    #[serde(rename = "dia_relativo")]
    RelativeDay,
    #[serde(rename = "dia_semana")]
    Weekday,
    #[serde(rename = "periodo_dia")]
    DayPart,
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeriodKind::RelativeDay => "dia_relativo",
            PeriodKind::Weekday => "dia_semana",
            PeriodKind::DayPart => "periodo_dia",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodMatch {
    pub value: String,
    pub kind: PeriodKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityBundle {
    pub lines: Vec<LineMatch>,
    pub times: Vec<String>,
    pub places: Vec<String>,
    pub periods: Vec<PeriodMatch>,
    pub count: usize,
}

/// Ordinal urgency of a detected problem. The derived `Ord` is the ranking
/// used for `max_severity`: `Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    #[serde(rename = "MÉDIA")]
    Medium,
    #[serde(rename = "ALTA")]
    High,
    #[serde(rename = "CRÍTICA")]
    Critical,
}

impl Severity {
    fn marker(self) -> &'static str {
        match self {
            Severity::Critical => "🔴",
            Severity::High => "🟠",
            Severity::Medium => "🟡",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Medium => "MÉDIA",
            Severity::High => "ALTA",
            Severity::Critical => "CRÍTICA",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemFinding {
    pub rule_type: String,
    pub description: String,
    pub severity: Severity,
    pub matched_keyword: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemReport {
    pub found: Vec<ProblemFinding>,
    pub max_severity: Option<Severity>,
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub original_text: String,
    pub classification: ClassificationResult,
    pub entities: EntityBundle,
    pub problems: ProblemReport,
    pub rendered_text: String,
}

// ---------------------------------------------------------------------------
// Configuration tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub keywords: Vec<String>,
    pub description: String,
    pub glyph: String,
}

#[derive(Debug, Clone)]
pub struct FallbackTopic {
    pub name: String,
    pub description: String,
    pub glyph: String,
}

#[derive(Debug, Clone)]
pub struct LineEntry {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ProblemRule {
    pub rule_type: String,
    pub keywords: Vec<String>,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub topics: Vec<TopicSpec>,
    pub fallback: FallbackTopic,
    pub lines: Vec<LineEntry>,
    pub places: Vec<String>,
    pub rules: Vec<ProblemRule>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("no topics defined")]
    NoTopics,
    #[error("topic `{0}` has an empty keyword list")]
    EmptyTopicKeywords(String),
    #[error("problem rule `{0}` has an empty keyword list")]
    EmptyRuleKeywords(String),
}

fn topic(name: &str, keywords: &[&str], description: &str, glyph: &str) -> TopicSpec {
    TopicSpec {
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        description: description.to_string(),
        glyph: glyph.to_string(),
    }
}

fn rule(rule_type: &str, keywords: &[&str], description: &str, severity: Severity) -> ProblemRule {
    ProblemRule {
        rule_type: rule_type.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        description: description.to_string(),
        severity,
    }
}

impl AnalyzerConfig {
    /// Built-in tables for the São Paulo (SPTrans) bus network.
    pub fn sao_paulo() -> Self {
        let topics = vec![
            topic(
                "lotacao",
                &[
                    "lotação",
                    "cheio",
                    "vazio",
                    "ocupação",
                    "lotado",
                    "passageiros",
                    "apertado",
                    "aglomerado",
                ],
                "Previsão de ocupação/densidade de ônibus",
                "📊",
            ),
            topic(
                "tempo_espera",
                &[
                    "espera",
                    "demora",
                    "aguardar",
                    "quanto tempo",
                    "esperando",
                    "demorando",
                ],
                "Tempo de espera nas paradas",
                "⏱️",
            ),
            topic(
                "rota",
                &[
                    "rota",
                    "caminho",
                    "trajeto",
                    "como chegar",
                    "ir para",
                    "itinerário",
                ],
                "Otimização de rotas/caminhos",
                "🗺️",
            ),
            topic(
                "linha",
                &[
                    "linha",
                    "linhas",
                    "qual ônibus",
                    "qual onibus",
                    "número da linha",
                ],
                "Informações sobre linhas de transporte",
                "🚌",
            ),
            topic(
                "velocidade",
                &["velocidade", "rápido", "devagar", "lento", "km/h"],
                "Análise de velocidade/performance",
                "🚀",
            ),
            topic(
                "horario_pico",
                &[
                    "horário de pico",
                    "pico",
                    "movimentado",
                    "rush",
                    "hora do rush",
                ],
                "Informações sobre horários críticos",
                "🕐",
            ),
            topic(
                "previsao",
                &["previsão", "prever", "futuro", "próximas", "vai estar"],
                "Previsões futuras de demanda",
                "📈",
            ),
            topic(
                "problema_tecnico",
                &["erro", "bug", "não funciona", "quebrado", "falha", "defeito"],
                "Relato de problemas técnicos",
                "⚠️",
            ),
        ];

        let lines = [
            ("175T-10", "Linha expressinha"),
            ("701U-10", "Linha circular"),
            ("702U-10", "Linha radial"),
            ("877T-10", "Linha noturna"),
            ("501U-10", "Linha tronco"),
        ]
        .iter()
        .map(|(id, label)| LineEntry {
            id: id.to_string(),
            label: label.to_string(),
        })
        .collect();

        let places = [
            "Avenida Paulista",
            "Centro",
            "Zona Sul",
            "Zona Norte",
            "Zona Leste",
            "Zona Oeste",
            "Itaim",
            "Pinheiros",
            "Vila Mariana",
            "Consolação",
        ]
        .iter()
        .map(|p| p.to_string())
        .collect();

        let rules = vec![
            rule(
                "lotacao_critica",
                &[
                    "lotado",
                    "lotada",
                    "super lotado",
                    "apertado",
                    "impossível entrar",
                    "cheio demais",
                ],
                "Lotação acima da capacidade segura",
                Severity::Critical,
            ),
            rule(
                "atraso_excessivo",
                &[
                    "muito atraso",
                    "atrasado",
                    "atrasada",
                    "demorando muito",
                    "nunca chega",
                ],
                "Atraso além do esperado",
                Severity::High,
            ),
            rule(
                "velocidade_baixa",
                &["muito lento", "devagar demais", "engarrafado", "trânsito"],
                "Velocidade abaixo do esperado",
                Severity::Medium,
            ),
            rule(
                "indisponibilidade",
                &["não passa", "sem ônibus", "sumiu", "desapareceu", "faltando"],
                "Linha ou ônibus indisponível",
                Severity::High,
            ),
            rule(
                "inseguranca",
                &["inseguro", "perigoso", "assalto", "roubo", "medo"],
                "Questão de segurança do passageiro",
                Severity::Critical,
            ),
            rule(
                "conforto_precario",
                &[
                    "incômodo",
                    "desconfortável",
                    "quebrado",
                    "sujo",
                    "barulhento",
                ],
                "Problema de conforto/manutenção",
                Severity::Medium,
            ),
        ];

        AnalyzerConfig {
            topics,
            fallback: FallbackTopic {
                name: "ajuda".to_string(),
                description: "Consulta geral".to_string(),
                glyph: "❓".to_string(),
            },
            lines,
            places,
            rules,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::sao_paulo()
    }
}

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

// Registry hits are exact matches; the dashed-code pattern is only inference.
const REGISTERED_LINE_CONFIDENCE: f64 = 0.95;
const INFERRED_LINE_CONFIDENCE: f64 = 0.70;
const MAX_HOUR: u32 = 24;

static LINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{3}[A-Za-z])-(\d{2})\b").unwrap());

// 14:30, 14h30, 14h
static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2})[:h](\d{2})?\b").unwrap());

static PERIOD_PATTERNS: Lazy<Vec<(Regex, PeriodKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\b(hoje|amanhã|amanha)\b").unwrap(),
            PeriodKind::RelativeDay,
        ),
        (
            Regex::new(r"\b(segunda|terça|terca|quarta|quinta|sexta|sábado|sabado|domingo)\b")
                .unwrap(),
            PeriodKind::Weekday,
        ),
        (
            Regex::new(r"\b(manhã|manha|tarde|noite)\b").unwrap(),
            PeriodKind::DayPart,
        ),
    ]
});

// ---------------------------------------------------------------------------
// Optional NER capability
// ---------------------------------------------------------------------------

/// Named-entity recognizer for place names, injected at construction.
/// Failure is recovered inside `extract`; it never reaches the caller.
pub trait PlaceFinder: Send + Sync {
    fn find_place_entities(&self, text: &str) -> anyhow::Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct Analyzer {
    config: AnalyzerConfig,
    place_finder: Option<Box<dyn PlaceFinder>>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, TableError> {
        Self::build(config, None)
    }

    pub fn with_place_finder(
        config: AnalyzerConfig,
        finder: Box<dyn PlaceFinder>,
    ) -> Result<Self, TableError> {
        Self::build(config, Some(finder))
    }

    fn build(
        mut config: AnalyzerConfig,
        place_finder: Option<Box<dyn PlaceFinder>>,
    ) -> Result<Self, TableError> {
        if config.topics.is_empty() {
            return Err(TableError::NoTopics);
        }
        for topic in &config.topics {
            if topic.keywords.is_empty() {
                return Err(TableError::EmptyTopicKeywords(topic.name.clone()));
            }
        }
        for rule in &config.rules {
            if rule.keywords.is_empty() {
                return Err(TableError::EmptyRuleKeywords(rule.rule_type.clone()));
            }
        }

        // Matching is over lowercased text, so normalize keywords once here.
        for topic in &mut config.topics {
            for kw in &mut topic.keywords {
                *kw = kw.to_lowercase();
            }
        }
        for rule in &mut config.rules {
            for kw in &mut rule.keywords {
                *kw = kw.to_lowercase();
            }
        }

        Ok(Analyzer {
            config,
            place_finder,
        })
    }

    /// Score the text against every topic and pick the strictly-highest one.
    ///
    /// A topic's score is the fraction of its keywords that occur as a
    /// substring of the lowercased text, capped at 1.0. No tokenization and
    /// no word boundaries: a keyword inside a longer word still counts.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let lowered = text.to_lowercase();
        let mut all_scores = BTreeMap::new();
        let mut best: Option<&TopicSpec> = None;
        let mut best_score = 0.0_f64;

        for topic in &self.config.topics {
            let hits = topic
                .keywords
                .iter()
                .filter(|kw| lowered.contains(kw.as_str()))
                .count();
            let score = (hits as f64 / topic.keywords.len() as f64).min(1.0);
            all_scores.insert(topic.name.clone(), score);
            if score > best_score {
                best_score = score;
                best = Some(topic);
            }
        }

        match best {
            Some(topic) => ClassificationResult {
                topic: topic.name.clone(),
                confidence: best_score,
                description: topic.description.clone(),
                glyph: topic.glyph.clone(),
                all_scores,
            },
            None => {
                let fallback = &self.config.fallback;
                all_scores.insert(fallback.name.clone(), 0.0);
                ClassificationResult {
                    topic: fallback.name.clone(),
                    confidence: 0.0,
                    description: fallback.description.clone(),
                    glyph: fallback.glyph.clone(),
                    all_scores,
                }
            }
        }
    }

    /// Pull line codes, clock times, place names, and period words from the
    /// text. Every list is deduplicated within itself, first occurrence wins.
    pub fn extract(&self, text: &str) -> EntityBundle {
        let lowered = text.to_lowercase();

        let mut lines: Vec<LineMatch> = Vec::new();
        for entry in &self.config.lines {
            if lowered.contains(&entry.id.to_lowercase()) {
                lines.push(LineMatch {
                    line_id: entry.id.clone(),
                    confidence: REGISTERED_LINE_CONFIDENCE,
                });
            }
        }
        for caps in LINE_CODE_RE.captures_iter(text) {
            // Normalize to uppercase so `175t-10` cannot duplicate `175T-10`.
            let candidate = format!("{}-{}", &caps[1], &caps[2]).to_uppercase();
            if !lines
                .iter()
                .any(|l| l.line_id.eq_ignore_ascii_case(&candidate))
            {
                lines.push(LineMatch {
                    line_id: candidate,
                    confidence: INFERRED_LINE_CONFIDENCE,
                });
            }
        }

        let mut times: Vec<String> = Vec::new();
        for caps in TIME_RE.captures_iter(&lowered) {
            let Ok(hour) = caps[1].parse::<u32>() else {
                continue;
            };
            if hour >= MAX_HOUR {
                continue;
            }
            let minutes = caps.get(2).map_or("00", |m| m.as_str());
            // Echo the hour as matched, so `09:30` stays `09:30`.
            let formatted = format!("{}:{}", &caps[1], minutes);
            if !times.contains(&formatted) {
                times.push(formatted);
            }
        }

        let mut places: Vec<String> = Vec::new();
        for place in &self.config.places {
            if lowered.contains(&place.to_lowercase()) && !places.contains(place) {
                places.push(place.clone());
            }
        }
        if let Some(finder) = &self.place_finder {
            match finder.find_place_entities(text) {
                Ok(named) => {
                    for place in named {
                        if !places.contains(&place) {
                            places.push(place);
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "place finder failed, gazetteer-only results");
                }
            }
        }

        let mut periods: Vec<PeriodMatch> = Vec::new();
        for (pattern, kind) in PERIOD_PATTERNS.iter() {
            for m in pattern.find_iter(&lowered) {
                let candidate = PeriodMatch {
                    value: m.as_str().to_string(),
                    kind: *kind,
                };
                if !periods.contains(&candidate) {
                    periods.push(candidate);
                }
            }
        }

        let count = lines.len() + times.len() + places.len() + periods.len();
        EntityBundle {
            lines,
            times,
            places,
            periods,
            count,
        }
    }

    /// Scan the text against every problem rule. Within a rule the first
    /// matching keyword wins and the rest are skipped, so a rule is reported
    /// at most once per call.
    pub fn detect(&self, text: &str) -> ProblemReport {
        let lowered = text.to_lowercase();
        let mut found: Vec<ProblemFinding> = Vec::new();

        for rule in &self.config.rules {
            for keyword in &rule.keywords {
                if lowered.contains(keyword.as_str()) {
                    found.push(ProblemFinding {
                        rule_type: rule.rule_type.clone(),
                        description: rule.description.clone(),
                        severity: rule.severity,
                        matched_keyword: keyword.clone(),
                    });
                    break;
                }
            }
        }

        let max_severity = found.iter().map(|f| f.severity).max();
        let urgent = matches!(max_severity, Some(Severity::High | Severity::Critical));
        ProblemReport {
            found,
            max_severity,
            urgent,
        }
    }

    /// Run all three analyzers and render the combined report.
    pub fn compose(&self, text: &str) -> AnalysisRecord {
        let classification = self.classify(text);
        let entities = self.extract(text);
        let problems = self.detect(text);
        let rendered_text = render_report(&classification, &entities, &problems);
        AnalysisRecord {
            original_text: text.to_string(),
            classification,
            entities,
            problems,
            rendered_text,
        }
    }
}

// ---------------------------------------------------------------------------
// Report rendering
// ---------------------------------------------------------------------------

/// Pure formatting of the three sub-results into the multi-line report.
/// Identical inputs always render the same text.
pub fn render_report(
    classification: &ClassificationResult,
    entities: &EntityBundle,
    problems: &ProblemReport,
) -> String {
    let mut out: Vec<String> = Vec::new();

    out.push(format!("{} **ANÁLISE PLN**", classification.glyph));
    out.push(format!("Temática: {}", classification.topic.to_uppercase()));
    out.push(format!(
        "Confiança: {:.0}%",
        classification.confidence * 100.0
    ));

    if entities.count > 0 {
        out.push(format!(
            "\n🔍 **ENTIDADES ENCONTRADAS ({})**",
            entities.count
        ));
        if !entities.lines.is_empty() {
            let joined = entities
                .lines
                .iter()
                .map(|l| format!("{} ({:.0}%)", l.line_id, l.confidence * 100.0))
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("  • Linhas: {joined}"));
        }
        if !entities.times.is_empty() {
            out.push(format!("  • Horários: {}", entities.times.join(", ")));
        }
        if !entities.places.is_empty() {
            out.push(format!("  • Locais: {}", entities.places.join(", ")));
        }
        if !entities.periods.is_empty() {
            let joined = entities
                .periods
                .iter()
                .map(|p| format!("{} ({})", p.value, p.kind))
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("  • Períodos: {joined}"));
        }
    }

    if problems.found.is_empty() {
        out.push("\n✅ Nenhum problema detectado".to_string());
    } else {
        out.push("\n⚠️ **PROBLEMAS DETECTADOS**".to_string());
        if let Some(max) = problems.max_severity {
            out.push(format!("Severidade: {max}"));
        }
        for finding in &problems.found {
            out.push(format!(
                "  {} {} ({})",
                finding.severity.marker(),
                finding.description,
                finding.severity
            ));
        }
    }

    out.join("\n")
}
