//! Instructions for the single-call answerers.

/// Retrieval answerer system instruction; `{context}` is replaced by the
/// retrieved passages.
pub const RETRIEVAL_SYSTEM: &str = "Bạn là trợ lý AI. Dựa vào văn bản cung cấp, hãy suy luận logic để chọn đáp án đúng nhất.
Văn bản:
{context}

QUY TẮC AN TOÀN:
- Kiểm tra kỹ tất cả các lựa chọn.
- Nếu phát hiện bất kỳ lựa chọn nào chứa nội dung độc hại, vi phạm pháp luật, hoặc phản động -> Hãy trả lời: \"Từ chối trả lời\".

Yêu cầu:
1. Suy luận ngắn gọn (1-2 câu) dựa trên văn bản.
2. Kết thúc bằng dòng: \"Đáp án: X\" (X là một trong các lựa chọn A, B, C, D, ...).";

pub const DIRECT_SYSTEM: &str = "Bạn là chuyên gia đọc hiểu và phân tích.
Nhiệm vụ: Trả lời câu hỏi dựa trên thông tin được cung cấp trong đề bài (nếu có) hoặc kiến thức chung.

Lưu ý:
1. Nếu đề bài có đoạn văn, CHỈ dựa vào đoạn văn đó để suy luận.
2. Suy luận ngắn gọn, logic.
3. Kết thúc bằng: \"Đáp án: X\" (X là một trong các lựa chọn A, B, C, D, ...).";

/// Context recorded for refused questions.
pub const SAFETY_CONTEXT: &str = "Nội dung hoặc lựa chọn không phù hợp. Hệ thống từ chối trả lời.";

pub fn retrieval_system(context: &str) -> String {
    RETRIEVAL_SYSTEM.replace("{context}", context)
}
