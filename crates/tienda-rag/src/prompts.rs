//! Store profile and prompt templates.
//!
//! Everything the oracle is told lives here: the store's identity facts, the
//! per-stage instruction templates and the grounded fact sheets the
//! synthesizer works from. Templates keep the deployed wire vocabulary
//! (`intencion`, `productos_seleccionados`, ...) so transcripts stay
//! comparable across versions.

use serde::{Deserialize, Serialize};

use crate::search::normalize_text;
use crate::session::{ConversationMessage, Role};
use crate::taxonomy::Taxonomy;
use crate::types::Product;

/// Characters of description shown to the oracle per candidate.
const SUMMARY_DESCRIPTION_CHARS: usize = 150;
/// History turns replayed into the classifier prompt.
const CLASSIFIER_HISTORY_TURNS: usize = 4;

pub const APOLOGY_REPLY: &str =
    "Lo siento, ocurrió un error al procesar tu consulta. ¿Podrías intentar de nuevo?";

pub const GENERAL_FALLBACK_REPLY: &str = "Lo siento, ocurrió un error. ¿En qué más puedo ayudarte?";

pub const DEFAULT_CLARIFICATION_QUESTION: &str =
    "¿Podrías darme más detalles? Por ejemplo, ¿para qué edad, género u ocasión lo buscas?";

// ---------------------------------------------------------------------------
// Store profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaqEntry {
    pub keywords: Vec<String>,
    pub reply: String,
}

/// Identity facts injected into every conversational prompt. Defaults carry
/// the Torres Jr. 2 deployment; a config file can override any field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreProfile {
    pub name: String,
    pub specialty: String,
    pub address: String,
    pub hours: String,
    pub ruc: String,
    pub payments: String,
    pub exchange_policy: String,
    pub extras: Vec<String>,
    pub welcome_message: String,
    pub faq: Vec<FaqEntry>,
}

impl Default for StoreProfile {
    fn default() -> Self {
        Self {
            name: "Torres Jr. 2".to_string(),
            specialty: "tienda de ropa infantil".to_string(),
            address: "Calle Grau #739, Sullana, Piura".to_string(),
            hours: "9:00 AM a 9:00 PM todos los días".to_string(),
            ruc: "10404099685".to_string(),
            payments: "Efectivo, tarjeta, Yape, Plin y transferencias".to_string(),
            exchange_policy: "Sí, con boleta y producto intacto".to_string(),
            extras: vec![
                "NO ofrecemos delivery ni WhatsApp".to_string(),
                "Precios por mayor disponibles".to_string(),
                "Mercadería nueva llega mensualmente".to_string(),
            ],
            welcome_message: default_welcome_message(),
            faq: default_faq(),
        }
    }
}

fn default_welcome_message() -> String {
    "¡Hola! Soy el asistente virtual de Torres Jr. 2 😊\n\n\
     Nos especializamos en ropa para mujeres, niños, bebés y accesorios. Puedes preguntarme por:\n\n\
     • **Ropa para bebé** (ajuares, overoles, bodys)\n\
     • **Ropa para niño y niña** (polos, pantalones, vestidos)\n\
     • **Ropa de mujeres** (blusas, pantalones, vestidos)\n\
     • **Ropa de maternidad y lactancia**\n\
     • **Accesorios** (bolsos, mochilas, carteras)\n\
     • **Stock, tallas y colores específicos**\n\
     • **Información de la tienda**\n\n\
     ¿En qué puedo ayudarte hoy?"
        .to_string()
}

fn default_faq() -> Vec<FaqEntry> {
    vec![
        FaqEntry {
            keywords: vec!["horario".to_string(), "hora".to_string(), "abren".to_string(), "cierran".to_string()],
            reply: "Estamos abiertos de **9:00 AM a 9:00 PM** todos los días. \
                    ¿Te gustaría conocer algún producto en particular?"
                .to_string(),
        },
        FaqEntry {
            keywords: vec!["ubicacion".to_string(), "direccion".to_string(), "donde".to_string(), "queda".to_string()],
            reply: "Nos encontramos en **Calle Grau #739, Sullana, Piura**. \
                    ¿Hay algún producto que te interese consultar?"
                .to_string(),
        },
        FaqEntry {
            keywords: vec!["pago".to_string(), "yape".to_string(), "plin".to_string(), "tarjeta".to_string(), "efectivo".to_string()],
            reply: "Aceptamos **efectivo, tarjeta, Yape, Plin y transferencias**. \
                    También manejamos precios especiales por mayor. ¿Qué producto te interesa?"
                .to_string(),
        },
        FaqEntry {
            keywords: vec!["delivery".to_string(), "envio".to_string(), "envian".to_string()],
            reply: "Por el momento **no ofrecemos delivery**, pero puedes visitarnos en nuestra \
                    tienda en Calle Grau #739. ¿Te gustaría conocer nuestros productos disponibles?"
                .to_string(),
        },
        FaqEntry {
            keywords: vec!["cambio".to_string(), "cambios".to_string(), "devolucion".to_string()],
            reply: "Sí, realizamos **cambios con boleta y que el producto esté intacto**. \
                    ¿Hay alguna prenda específica que te interese?"
                .to_string(),
        },
        FaqEntry {
            keywords: vec!["calidad".to_string(), "tela".to_string(), "algodon".to_string(), "pima".to_string()],
            reply: "Trabajamos con **algodón 100%** y **algodón pima** (mayor calidad y duración). \
                    ¿Buscas algún tipo de prenda en particular?"
                .to_string(),
        },
    ]
}

/// Keyword FAQ lookup for when the oracle is unavailable.
pub fn faq_reply(store: &StoreProfile, utterance: &str) -> Option<String> {
    let normalized = normalize_text(utterance);
    store
        .faq
        .iter()
        .find(|entry| {
            entry
                .keywords
                .iter()
                .any(|keyword| normalized.contains(normalize_text(keyword).as_str()))
        })
        .map(|entry| entry.reply.clone())
}

// ---------------------------------------------------------------------------
// Greeting detection
// ---------------------------------------------------------------------------

const GREETING_WORDS: &[&str] = &[
    "hola", "holi", "ola", "hey", "buenas", "buenos", "dias", "tardes", "noches", "que", "tal",
    "saludos",
];

/// True when the prompt is nothing but a salutation ("hola", "buenas tardes").
/// "hola busco un polo" is not a bare greeting, it carries a real query.
pub fn is_bare_greeting(prompt: &str) -> bool {
    let normalized = normalize_text(prompt);
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    !words.is_empty() && words.len() <= 4 && words.iter().all(|w| GREETING_WORDS.contains(w))
}

// ---------------------------------------------------------------------------
// Price and text formatting
// ---------------------------------------------------------------------------

pub fn format_price(value: f64) -> String {
    format!("S/ {:.2}", value)
}

/// "S/ 20.00" for a single price point, "S/ 20.00 - S/ 35.00" for a spread.
pub fn price_range_label(product: &Product) -> String {
    match product.price_range() {
        Some((min, max)) if min == max => format_price(min),
        Some((min, max)) => format!("{} - {}", format_price(min), format_price(max)),
        None => "Precio por confirmar".to_string(),
    }
}

/// Char-boundary safe truncation with a trailing ellipsis.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

fn render_recent_history(messages: &[ConversationMessage], turns: usize) -> String {
    let start = messages.len().saturating_sub(turns);
    messages[start..]
        .iter()
        .map(|message| match message.role {
            Role::User => format!("Cliente: {}", message.text),
            Role::Model => format!("Asistente: {}", message.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_taxonomy(taxonomy: &Taxonomy) -> String {
    taxonomy
        .iter()
        .map(|(category, subcategories)| format!("- {}: [{}]", category, subcategories.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Stage prompts
// ---------------------------------------------------------------------------

/// Intent classification over the live taxonomy, with the recent turns so
/// follow-ups ("¿en rojo?") can be recognized.
pub fn classifier_prompt(
    utterance: &str,
    history: &[ConversationMessage],
    taxonomy: &Taxonomy,
) -> String {
    let history_block = if history.is_empty() {
        "(sin historial)".to_string()
    } else {
        render_recent_history(history, CLASSIFIER_HISTORY_TURNS)
    };

    format!(
        r#"Analiza la consulta de un cliente de una tienda de ropa infantil y clasifica su intención.

CONSULTA DEL CLIENTE: "{utterance}"

HISTORIAL RECIENTE:
{history_block}

CATEGORÍAS Y SUBCATEGORÍAS DISPONIBLES:
{taxonomy_block}

INTENCIONES POSIBLES:
- "producto": busca un producto del catálogo. Incluye las categorías candidatas (puede haber varias, por ejemplo ropa de bebé toca Conjuntos y Accesorios).
- "seguimiento": se refiere a productos que el asistente YA mostró antes ("¿lo tienen en rojo?", "el segundo").
- "aclaracion": quiere un producto pero falta edad, género u ocasión ("algo bonito", "un regalo"). Incluye una pregunta para aclarar.
- "fuera_de_tema": no es sobre productos del catálogo (horario, ubicación, pagos, conversación general).

INSTRUCCIONES:
- Usa SOLO nombres exactos de las categorías y subcategorías listadas.
- Si dudas entre producto y aclaracion, prefiere producto.
- Responde SOLO con JSON válido.

FORMATO DE RESPUESTA:
{{"intencion": "producto", "categorias": ["nombre_exacto"], "subcategorias": ["nombre_exacto"], "pregunta": "", "productos_referidos": []}}

EJEMPLOS:
- "mochilas" → {{"intencion": "producto", "categorias": ["Bolsos y Mochilas"], "subcategorias": ["Mochilas"]}}
- "ropa de bebé" → {{"intencion": "producto", "categorias": ["Conjuntos"], "subcategorias": ["Bodies para bebé", "Conjunto de bebé"]}}
- "algo bonito" → {{"intencion": "aclaracion", "pregunta": "¿Para qué edad y ocasión lo buscas?"}}
- "¿a qué hora abren?" → {{"intencion": "fuera_de_tema"}}
- "¿lo tienen en rojo?" (tras mostrar productos) → {{"intencion": "seguimiento"}}"#,
        utterance = utterance,
        history_block = history_block,
        taxonomy_block = render_taxonomy(taxonomy),
    )
}

/// One line per candidate for the relevance filter.
pub fn summarize_candidates(products: &[Product]) -> String {
    products
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let min_price = p
                .min_price()
                .map(format_price)
                .unwrap_or_else(|| "sin precio".to_string());
            format!(
                "{}. ID: {} | {} | {} | {} / {} | Stock: {} | Desde {}",
                i + 1,
                p.id,
                p.name,
                truncate_chars(&p.description, SUMMARY_DESCRIPTION_CHARS),
                p.category,
                p.subcategory,
                p.total_stock(),
                min_price,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Relevance selection with the demographic rules spelled out.
pub fn filter_prompt(utterance: &str, products: &[Product], max_selected: usize) -> String {
    format!(
        r#"Analiza la consulta del cliente y selecciona los productos MÁS RELEVANTES.

CONSULTA: "{utterance}"

PRODUCTOS DISPONIBLES:
{summaries}

INSTRUCCIONES:
- Si la consulta menciona edad o género (bebé, niño, niña, mujer), EXCLUYE productos cuyo nombre indique otra edad u otro género.
- Si un producto no deja claro su público, INCLÚYELO.
- Para consultas genéricas como "mochilas", selecciona TODAS las mochilas disponibles.
- Máximo {max_selected} productos.
- Prioriza productos con stock disponible.
- Responde SOLO con JSON válido usando los IDs exactos.

FORMATO:
{{"productos_seleccionados": ["id1", "id2"]}}"#,
        utterance = utterance,
        summaries = summarize_candidates(products),
        max_selected = max_selected,
    )
}

/// One line per candidate with the attributes the validator reasons over.
pub fn detail_candidates(products: &[Product]) -> String {
    products
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "{}. ID: {} | {} | Colores: [{}] | Tallas con stock: [{}] | {}",
                i + 1,
                p.id,
                p.name,
                p.available_colors().join(", "),
                p.in_stock_size_labels().join(", "),
                price_range_label(p),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Constraint check over color/size/price. Narrowing only: the oracle may
/// drop candidates, never add new ones.
pub fn validator_prompt(utterance: &str, products: &[Product]) -> String {
    format!(
        r#"Analiza si los productos cumplen con las especificaciones de la consulta.

CONSULTA: "{utterance}"

PRODUCTOS CON DETALLES:
{details}

INSTRUCCIONES:
- Si la consulta especifica color, talla o precio, conserva SOLO los productos que cumplan.
- Si NO especifica detalles, devuelve todos los productos.
- Si NO hay coincidencias exactas pero hay opciones parecidas, márcalas con "son_similares": true.
- Máximo 4 productos finales.
- Responde SOLO con JSON válido usando los IDs exactos.

FORMATO:
{{"productos_finales": ["id1", "id2"], "son_similares": false}}"#,
        utterance = utterance,
        details = detail_candidates(products),
    )
}

/// Fully grounded per-product fact sheets for the synthesizer.
pub fn fact_sheets(products: &[Product]) -> String {
    products
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let colors = p.available_colors().join(", ");
            let sizes = p
                .offers_in_stock()
                .iter()
                .map(|offer| {
                    format!(
                        "{} ({} unidades - {})",
                        offer.label,
                        offer.quantity,
                        format_price(offer.price)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");

            format!(
                "PRODUCTO REAL {n}:\n\
                 - ID: {id}\n\
                 - Nombre EXACTO: {name}\n\
                 - Categoría: {category}\n\
                 - Precio: {price}\n\
                 - Colores disponibles: {colors}\n\
                 - Tallas con stock: {sizes}\n\
                 - Stock total: {stock} unidades\n\
                 \n\
                 IMPORTANTE: Este producto EXISTE realmente en nuestra tienda.",
                n = i + 1,
                id = p.id,
                name = p.name,
                category = p.category,
                price = price_range_label(p),
                colors = if colors.is_empty() { "No especificado".to_string() } else { colors },
                sizes = if sizes.is_empty() { "Sin stock".to_string() } else { sizes },
                stock = p.total_stock(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Final reply generation. The marker line is demanded here and enforced
/// mechanically afterwards.
pub fn synthesizer_prompt(
    utterance: &str,
    products: &[Product],
    only_similar: bool,
    word_budget: usize,
) -> String {
    let ids = products.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join(",");
    let heading = if only_similar {
        "## PRODUCTOS SIMILARES ENCONTRADOS:"
    } else {
        "## PRODUCTOS ENCONTRADOS:"
    };
    let tone_line = if only_similar {
        "Menciona que son \"productos similares\" a lo pedido."
    } else {
        "Confirma que tienes estos productos."
    };

    format!(
        r#"Eres el asistente virtual de una tienda de ropa infantil. Ya estás en medio de una conversación.

{heading}
{sheets}

CONSULTA DEL CLIENTE: "{utterance}"

INSTRUCCIONES PARA LA RESPUESTA:
- Respuesta corta y directa (máximo {word_budget} palabras).
- {tone_line}
- Usa SOLO los datos de los productos listados: nombres exactos y precios reales.
- NO inventes colores, tallas ni precios.
- NO repitas saludos ni información de la tienda.
- OBLIGATORIO: Termina con [PRODUCTOS:{ids}]"#,
        heading = heading,
        sheets = fact_sheets(products),
        utterance = utterance,
        word_budget = word_budget,
        tone_line = tone_line,
        ids = ids,
    )
}

/// Canned fallback when the synthesizer oracle call fails.
pub fn synthesizer_fallback_text(only_similar: bool) -> &'static str {
    if only_similar {
        "Encontré productos similares a tu búsqueda."
    } else {
        "Tenemos estos productos disponibles."
    }
}

/// Zero-candidate reply: name up to `cap` real categories, never a marker.
pub fn no_results_reply(utterance: &str, taxonomy: &Taxonomy, cap: usize) -> String {
    let categories = taxonomy.keys().take(cap).cloned().collect::<Vec<_>>();
    if categories.is_empty() {
        return format!(
            "No encontré productos para \"{}\". ¿Podrías intentar con otra descripción?",
            utterance
        );
    }
    format!(
        "No encontré productos para \"{}\". ¿Te interesan nuestras categorías disponibles: {}?",
        utterance,
        categories.join(", ")
    )
}

/// System instruction for store questions and chit-chat.
pub fn general_system_prompt(store: &StoreProfile) -> String {
    let extras = store
        .extras
        .iter()
        .map(|extra| format!("- {}", extra))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Eres el asistente virtual de {name}, {specialty} en {address}.

INFORMACIÓN DE LA TIENDA:
- Horario: {hours}
- Ubicación: {address}
- RUC: {ruc}
- Pagos: {payments}
- Cambios: {exchange_policy}
{extras}

INSTRUCCIONES:
- Responde preguntas generales sobre la tienda.
- Mantén respuestas cortas y útiles.
- NO repitas saludos de bienvenida.
- NO menciones productos específicos a menos que pregunten.
- NO incluyas marcadores [PRODUCTOS:].
- Si preguntan por productos, sugiere que sean más específicos."#,
        name = store.name,
        specialty = store.specialty,
        address = store.address,
        hours = store.hours,
        ruc = store.ruc,
        payments = store.payments,
        exchange_policy = store.exchange_policy,
        extras = extras,
    )
}
