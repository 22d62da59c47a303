//! Prompts for VLM-based document extraction.
//!
//! The instruction block is a byte-fixed constant: the only variable part of
//! an inference request is the image sequence. Keeping the text here lets
//! unit tests pin the output schema the model is asked for without spinning
//! up a provider.

/// Fragment the model's reply is primed with.
///
/// The model continues *after* this text, so its completion starts inside a
/// JSON code block and ends with a closing fence that the repair stage
/// strips.
pub const RESPONSE_PREFILL: &str = "```json";

/// Closing fence expected at the end of a primed completion.
pub const CLOSING_FENCE: &str = "```";

/// Instruction block appended after the page images in the user turn.
pub const EXTRACTION_INSTRUCTIONS: &str = r#"Task:
Extract and analyze the content from the provided document images and return the information in a structured JSON format.

Context information:
- The input consists of one or more document images, one image per page, in page order
- The images may contain text, tables, lists, or figures
- Process the pages sequentially and maintain the logical flow and hierarchy of the content

Model Instructions:
- Process each image thoroughly to extract all visible text
- Preserve the structure and relationships between different content elements
- Handle both typed and handwritten text if present
- Identify and properly format any tables, lists, or structured data
- Describe every figure, chart, or photograph you find

Response style and format requirements:
- Respond in the same language as the input document
- Return the output as a single valid JSON object and nothing else
- Summarize the extracted text of each page in a short, clear and concise manner
- Use clear, descriptive keys and preserve formatting where semantically meaningful
- Output Schema:
{
  "pages": [
    {
      "page_number": 1,
      "summary": "extracted text goes here",
      "tables": [
        {
          "table_number": 1,
          "content": [
            ["row1col1", "row1col2"],
            ["row2col1", "row2col2"]
          ]
        }
      ],
      "lists": [
        {
          "list_number": 1,
          "items": ["item1", "item2"]
        }
      ],
      "images": [
        {
          "image_number": 1,
          "description": "description of the image goes here"
        }
      ]
    }
  ]
}
- Use empty arrays for pages without tables, lists, or images
- Ensure the JSON is valid and well-structured"#;
