//! Well-known vocabulary IRIs used by the store core.

/// The `rdf:langString` datatype; the only datatype that pairs with a
/// language tag.
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// The `xsd:string` datatype; the implicit datatype of a plain literal.
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
